//! Secret handling for configuration.
//!
//! # Contract
//! - The Grafana password only arrives through a flag or the environment.
//!   A config file that carries it, or any token-looking literal, is rejected.
//! - `Debug` on secret-carrying types prints `<REDACTED>`.
//! - Error messages name the offending key, never the value.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal prefixes that never belong in a config file.
const SECRET_PREFIXES: &[&str] = &[
    "glsa_",      // Grafana service account token
    "glc_",       // Grafana Cloud token
    "eyJrIjoi",   // legacy Grafana API key (base64 JSON)
    "ya29.",      // Google OAuth access token
    "-----BEGIN", // PEM private keys
];

/// Config keys whose value must never come from a file.
const FILE_FORBIDDEN_POINTERS: &[&str] = &["/grafana/password"];

/// Grafana admin password. Redacted in `Debug`; never serialized.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct GrafanaPassword(String);

impl GrafanaPassword {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for GrafanaPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("<REDACTED>")
        }
    }
}

impl Serialize for GrafanaPassword {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(if self.0.is_empty() { "" } else { "<REDACTED>" })
    }
}

/// Reject a file layer that carries secrets.
pub(crate) fn enforce_no_secrets_in_file(file: &Value) -> Result<()> {
    for ptr in FILE_FORBIDDEN_POINTERS {
        if file.pointer(ptr).is_some() {
            bail!(
                "CONFIG_SECRET_IN_FILE key={ptr}: pass it with --grafana-password or GRAFANA_PASSWORD"
            );
        }
    }

    let mut leaves = Vec::new();
    collect_string_leaves(file, "", &mut leaves);
    for (ptr, value) in leaves {
        if looks_like_secret(value) {
            bail!("CONFIG_SECRET_DETECTED key={ptr} value=REDACTED");
        }
    }
    Ok(())
}

fn collect_string_leaves<'a>(v: &'a Value, prefix: &str, out: &mut Vec<(String, &'a str)>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map {
                collect_string_leaves(vv, &format!("{prefix}/{k}"), out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                collect_string_leaves(vv, &format!("{prefix}/{i}"), out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.as_str())),
        _ => {}
    }
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn password_debug_is_redacted() {
        let p = GrafanaPassword::new("hunter2");
        assert_eq!(format!("{p:?}"), "<REDACTED>");
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"<REDACTED>\"");
        assert_eq!(format!("{:?}", GrafanaPassword::default()), "\"\"");
    }

    #[test]
    fn password_key_in_file_is_rejected() {
        let err = enforce_no_secrets_in_file(&json!({ "grafana": { "password": "x" } }))
            .unwrap_err()
            .to_string();
        assert!(err.contains("CONFIG_SECRET_IN_FILE"));
        assert!(!err.contains("\"x\""));
    }

    #[test]
    fn token_literals_are_rejected_anywhere() {
        let doc = json!({ "static_rules": ["glsa_abcdefghijklmnop:Main:Admin"] });
        let err = enforce_no_secrets_in_file(&doc).unwrap_err().to_string();
        assert!(err.contains("CONFIG_SECRET_DETECTED key=/static_rules/0"));
        assert!(!err.contains("glsa_abcdefghijklmnop"));
    }

    #[test]
    fn plain_values_pass() {
        let doc = json!({
            "rules": ["eng@co.com:Main:Editor"],
            "grafana": { "host": "grafana.internal:3000", "username": "admin" }
        });
        enforce_no_secrets_in_file(&doc).unwrap();
    }
}
