//! gsync-config
//!
//! Effective daemon configuration, layered lowest to highest:
//!
//! 1. built-in defaults
//! 2. optional YAML file (`--config` / `GSYNC_CONFIG`)
//! 3. flags and environment, as parsed by the binary into [`ConfigOverrides`]
//!
//! Layers are merged as JSON trees: objects merge key by key, anything else
//! (lists included) replaces the lower layer.

mod secrets;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use gsync_core::{parse_rule, parse_static_rule, Role};
use gsync_reconcile::{SyncMode, SyncSettings};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub use secrets::GrafanaPassword;

pub const DEFAULT_INTERVAL_MS: u64 = 86_400_000;
pub const DEFAULT_CREDENTIALS_PATH: &str = ".credentials.json";
pub const DEFAULT_GRAFANA_HOST: &str = "localhost:3000";
pub const DEFAULT_PORT: u16 = 5000;

// ---------------------------------------------------------------------------
// Effective config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GsyncConfig {
    /// Dynamic rules, `<group>:<org>:<role>`.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Static rules, `<email>:<org>:<role>`.
    #[serde(default)]
    pub static_rules: Vec<String>,
    pub mode: SyncMode,
    #[serde(default)]
    pub exclude_role: Option<Role>,
    pub interval_ms: u64,
    pub google: GoogleConfig,
    pub grafana: GrafanaConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoogleConfig {
    /// Service account key file.
    pub credentials: PathBuf,
    /// Workspace admin the service account acts as.
    pub admin_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrafanaConfig {
    pub protocol: String,
    pub host: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: GrafanaPassword,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Fallback directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for GsyncConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            static_rules: Vec::new(),
            mode: SyncMode::Sync,
            exclude_role: None,
            interval_ms: DEFAULT_INTERVAL_MS,
            google: GoogleConfig {
                credentials: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
                admin_email: String::new(),
            },
            grafana: GrafanaConfig {
                protocol: "http".to_string(),
                host: DEFAULT_GRAFANA_HOST.to_string(),
                username: "admin".to_string(),
                password: GrafanaPassword::default(),
            },
            server: ServerConfig { port: DEFAULT_PORT },
            log: LogConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl GsyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// `protocol://host`.
    pub fn grafana_base_url(&self) -> String {
        format!("{}://{}", self.grafana.protocol, self.grafana.host)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            rules: self.rules.clone(),
            static_rules: self.static_rules.clone(),
            mode: self.mode,
            exclude_role: self.exclude_role,
        }
    }

    /// Hard errors fail the load. Malformed rules only warn: they are still
    /// skipped and counted on every pass.
    fn validate(&self) -> Result<Vec<String>> {
        if self.interval_ms == 0 {
            bail!("CONFIG_INVALID interval_ms must be greater than 0");
        }
        if !matches!(self.grafana.protocol.as_str(), "http" | "https") {
            bail!(
                "CONFIG_INVALID grafana.protocol '{}': expected http | https",
                self.grafana.protocol
            );
        }
        if self.grafana.host.trim().is_empty() {
            bail!("CONFIG_INVALID grafana.host is empty");
        }

        let mut warnings = Vec::new();
        for rule in &self.rules {
            if let Err(e) = parse_rule(rule) {
                warnings.push(format!("dynamic rule will be skipped: {e}"));
            }
        }
        for rule in &self.static_rules {
            if let Err(e) = parse_static_rule(rule) {
                warnings.push(format!("static rule will be skipped: {e}"));
            }
        }
        if self.grafana.password.is_empty() {
            warnings.push("grafana password is empty".to_string());
        }
        if self.google.admin_email.is_empty() {
            warnings.push("google admin email is empty; directory lookups will fail".to_string());
        }
        Ok(warnings)
    }
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Values given on the command line or through the environment.
///
/// `None` / empty means "not given", so lower layers show through.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub rules: Vec<String>,
    pub static_rules: Vec<String>,
    pub mode: Option<SyncMode>,
    pub exclude_role: Option<Role>,
    pub interval_ms: Option<u64>,
    pub google_credentials: Option<PathBuf>,
    pub google_admin_email: Option<String>,
    pub grafana_protocol: Option<String>,
    pub grafana_host: Option<String>,
    pub grafana_username: Option<String>,
    pub grafana_password: Option<GrafanaPassword>,
    pub port: Option<u16>,
    pub level: Option<String>,
}

impl ConfigOverrides {
    fn to_layer(&self) -> Value {
        let mut root = Map::new();
        if !self.rules.is_empty() {
            root.insert("rules".into(), json!(self.rules));
        }
        if !self.static_rules.is_empty() {
            root.insert("static_rules".into(), json!(self.static_rules));
        }
        if let Some(mode) = self.mode {
            root.insert("mode".into(), json!(mode));
        }
        if let Some(role) = self.exclude_role {
            root.insert("exclude_role".into(), json!(role));
        }
        if let Some(ms) = self.interval_ms {
            root.insert("interval_ms".into(), json!(ms));
        }

        let mut google = Map::new();
        if let Some(p) = &self.google_credentials {
            google.insert("credentials".into(), json!(p));
        }
        if let Some(e) = &self.google_admin_email {
            google.insert("admin_email".into(), json!(e));
        }
        if !google.is_empty() {
            root.insert("google".into(), Value::Object(google));
        }

        let mut grafana = Map::new();
        if let Some(v) = &self.grafana_protocol {
            grafana.insert("protocol".into(), json!(v));
        }
        if let Some(v) = &self.grafana_host {
            grafana.insert("host".into(), json!(v));
        }
        if let Some(v) = &self.grafana_username {
            grafana.insert("username".into(), json!(v));
        }
        if let Some(v) = &self.grafana_password {
            grafana.insert("password".into(), json!(v.expose()));
        }
        if !grafana.is_empty() {
            root.insert("grafana".into(), Value::Object(grafana));
        }

        if let Some(port) = self.port {
            root.insert("server".into(), json!({ "port": port }));
        }
        if let Some(level) = &self.level {
            root.insert("log".into(), json!({ "level": level }));
        }
        Value::Object(root)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: GsyncConfig,
    /// File layer, when one was read.
    pub source: Option<PathBuf>,
    /// Non-fatal problems for the caller to log.
    pub warnings: Vec<String>,
}

/// Load defaults, then `path` (if any), then `overrides`.
pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<LoadedConfig> {
    let raw = match path {
        Some(p) => Some(
            fs::read_to_string(p)
                .with_context(|| format!("failed to read config file: {}", p.display()))?,
        ),
        None => None,
    };
    let mut loaded = load_from_str(raw.as_deref(), overrides)
        .with_context(|| match path {
            Some(p) => format!("invalid config file: {}", p.display()),
            None => "invalid configuration".to_string(),
        })?;
    loaded.source = path.map(Path::to_path_buf);
    Ok(loaded)
}

/// [`load`] with the file layer given as YAML text.
pub fn load_from_str(yaml: Option<&str>, overrides: &ConfigOverrides) -> Result<LoadedConfig> {
    let defaults =
        serde_json::to_value(GsyncConfig::default()).context("defaults serialize failed")?;
    let mut merged = defaults;

    if let Some(raw) = yaml {
        let file = yaml_to_json(raw)?;
        secrets::enforce_no_secrets_in_file(&file)?;
        merged = deep_merge(merged, file);
    }
    merged = deep_merge(merged, overrides.to_layer());

    let mut config: GsyncConfig =
        serde_json::from_value(merged).context("config does not match the expected shape")?;
    config.rules = split_rule_list(&config.rules);
    config.static_rules = split_rule_list(&config.static_rules);

    let warnings = config.validate()?;
    Ok(LoadedConfig {
        config,
        source: None,
        warnings,
    })
}

fn yaml_to_json(raw: &str) -> Result<Value> {
    let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
    let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
    match v_json {
        // An empty file is an empty layer.
        Value::Null => Ok(json!({})),
        Value::Object(_) => Ok(v_json),
        _ => bail!("config file must be a mapping at the top level"),
    }
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

/// Flatten repeated and comma-separated rule values, dropping blanks.
pub fn split_rule_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
