use std::time::Duration;

use gsync_core::{OrgId, Role, UserId};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    members_with_role, single_org_role, GrafanaApi, GrafanaError, GrafanaResult, OrgUser, UserOrg,
};

/// How requests authenticate against Grafana.
#[derive(Clone)]
pub enum GrafanaAuth {
    Basic { username: String, password: String },
    Token(String),
}

impl std::fmt::Debug for GrafanaAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrafanaAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<REDACTED>")
                .finish(),
            GrafanaAuth::Token(_) => f.debug_tuple("Token").field(&"<REDACTED>").finish(),
        }
    }
}

/// Grafana HTTP API client.
#[derive(Debug, Clone)]
pub struct GrafanaClient {
    http: reqwest::Client,
    base_url: Url,
    auth: GrafanaAuth,
}

#[derive(Deserialize)]
struct IdBody {
    id: i64,
}

#[derive(Deserialize)]
struct MessageBody {
    #[serde(default)]
    message: String,
}

impl GrafanaClient {
    /// `base_url` is e.g. `http://localhost:3000` or a sub-path deployment.
    pub fn new(base_url: &str, auth: GrafanaAuth) -> GrafanaResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GrafanaError::Config(format!("invalid grafana url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GrafanaError::Config(format!(
                "grafana url {base_url} cannot be a base"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GrafanaError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    /// `protocol://host` as configured on the command line.
    pub fn from_parts(protocol: &str, host: &str, auth: GrafanaAuth) -> GrafanaResult<Self> {
        Self::new(&format!("{protocol}://{host}"), auth)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.http.request(method, url);
        match &self.auth {
            GrafanaAuth::Basic { username, password } => req.basic_auth(username, Some(password)),
            GrafanaAuth::Token(token) => req.bearer_auth(token),
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> GrafanaResult<Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| GrafanaError::Transport(format!("{what}: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let raw = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<MessageBody>(&raw)
            .map(|b| b.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(raw);

        if status == StatusCode::NOT_FOUND {
            return Err(GrafanaError::NotFound(format!("{what}: {message}")));
        }
        Err(GrafanaError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> GrafanaResult<T> {
        let resp = self.send(self.request(Method::GET, url), what).await?;
        resp.json()
            .await
            .map_err(|e| GrafanaError::Decode(format!("{what}: {e}")))
    }
}

#[async_trait::async_trait]
impl GrafanaApi for GrafanaClient {
    async fn find_org_id(&self, name: &str) -> GrafanaResult<OrgId> {
        let url = self.endpoint(&["orgs", "name", name]);
        let body: IdBody = self.get_json(url, &format!("org {name}")).await?;
        Ok(OrgId(body.id))
    }

    async fn list_org_members(&self, org_id: OrgId, role: Role) -> GrafanaResult<Vec<String>> {
        let org = org_id.to_string();
        let url = self.endpoint(&["orgs", &org, "users"]);
        let users: Vec<OrgUser> = self.get_json(url, &format!("org {org} users")).await?;
        let members = members_with_role(&users, role);
        debug!(org_id = %org_id, role = %role, count = members.len(), "listed org members");
        Ok(members)
    }

    async fn find_user_id(&self, identity: &str) -> GrafanaResult<UserId> {
        let mut url = self.endpoint(&["users", "lookup"]);
        url.query_pairs_mut().append_pair("loginOrEmail", identity);
        let body: IdBody = self.get_json(url, &format!("user {identity}")).await?;
        Ok(UserId(body.id))
    }

    async fn get_user_role(&self, user_id: UserId, org_id: OrgId) -> GrafanaResult<Option<Role>> {
        let user = user_id.to_string();
        let url = self.endpoint(&["users", &user, "orgs"]);
        let orgs: Vec<UserOrg> = self.get_json(url, &format!("user {user} orgs")).await?;
        Ok(single_org_role(&orgs, org_id))
    }

    async fn create_membership(
        &self,
        org_id: OrgId,
        identity: &str,
        role: Role,
    ) -> GrafanaResult<()> {
        let org = org_id.to_string();
        let url = self.endpoint(&["orgs", &org, "users"]);
        let req = self
            .request(Method::POST, url)
            .json(&json!({ "loginOrEmail": identity, "role": role.as_str() }));
        match self.send(req, &format!("add {identity} to org {org}")).await {
            Ok(_) => Ok(()),
            Err(GrafanaError::Api { status: 409, .. }) => Err(GrafanaError::AlreadyMember {
                org_id,
                identity: identity.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn update_membership_role(
        &self,
        org_id: OrgId,
        user_id: UserId,
        role: Role,
    ) -> GrafanaResult<()> {
        let org = org_id.to_string();
        let user = user_id.to_string();
        let url = self.endpoint(&["orgs", &org, "users", &user]);
        let req = self
            .request(Method::PATCH, url)
            .json(&json!({ "role": role.as_str() }));
        self.send(req, &format!("update user {user} in org {org}"))
            .await
            .map(|_| ())
    }

    async fn delete_membership(&self, org_id: OrgId, user_id: UserId) -> GrafanaResult<()> {
        let org = org_id.to_string();
        let user = user_id.to_string();
        let url = self.endpoint(&["orgs", &org, "users", &user]);
        self.send(
            self.request(Method::DELETE, url),
            &format!("remove user {user} from org {org}"),
        )
        .await
        .map(|_| ())
    }
}
