//! Command line and environment surface.
//!
//! Every option is optional here; defaults live in `gsync-config` so that a
//! config file can sit between them and the flags.

use std::path::PathBuf;

use clap::Parser;
use gsync_config::{ConfigOverrides, GrafanaPassword};
use gsync_core::Role;
use gsync_reconcile::SyncMode;

#[derive(Debug, Parser)]
#[command(
    name = "gsync-daemon",
    version,
    about = "Sync Google Workspace group members into Grafana org roles"
)]
pub struct Args {
    /// Dynamic rules `<group>:<org>:<role>`, repeatable or comma separated.
    #[arg(short = 'r', long = "rules", env = "RULES", value_delimiter = ',')]
    pub rules: Vec<String>,

    /// Static rules `<email>:<org>:<role>`, repeatable or comma separated.
    #[arg(
        short = 's',
        long = "static-rules",
        env = "STATIC_RULES",
        value_delimiter = ','
    )]
    pub static_rules: Vec<String>,

    /// `sync` also removes stale members; `upsert-only` never deletes.
    #[arg(short = 'm', long, env = "MODE")]
    pub mode: Option<SyncMode>,

    /// Members holding this role are never removed.
    #[arg(short = 'e', long, env = "EXCLUDE_ROLE")]
    pub exclude_role: Option<Role>,

    /// Pass interval in milliseconds.
    #[arg(short = 'i', long = "interval", env = "INTERVAL")]
    pub interval_ms: Option<u64>,

    #[arg(short = 'C', long, env = "GOOGLE_CREDENTIALS")]
    pub google_credentials: Option<PathBuf>,

    #[arg(short = 'A', long, env = "GOOGLE_ADMIN_EMAIL")]
    pub google_admin_email: Option<String>,

    #[arg(short = 'P', long, env = "GRAFANA_PROTOCOL")]
    pub grafana_protocol: Option<String>,

    #[arg(short = 'H', long, env = "GRAFANA_HOST")]
    pub grafana_host: Option<String>,

    #[arg(short = 'U', long, env = "GRAFANA_USERNAME")]
    pub grafana_username: Option<String>,

    #[arg(long, env = "GRAFANA_PASSWORD", hide_env_values = true)]
    pub grafana_password: Option<String>,

    /// HTTP port for health, metrics and the manual trigger.
    #[arg(short = 'p', long, env = "PORT")]
    pub port: Option<u16>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(short = 'l', long, env = "LEVEL")]
    pub level: Option<String>,

    /// Optional YAML config file.
    #[arg(short = 'c', long, env = "GSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Split into the config file path and the override layer.
    pub fn into_overrides(self) -> (Option<PathBuf>, ConfigOverrides) {
        let overrides = ConfigOverrides {
            rules: self.rules,
            static_rules: self.static_rules,
            mode: self.mode,
            exclude_role: self.exclude_role,
            interval_ms: self.interval_ms,
            google_credentials: self.google_credentials,
            google_admin_email: self.google_admin_email,
            grafana_protocol: self.grafana_protocol,
            grafana_host: self.grafana_host,
            grafana_username: self.grafana_username,
            grafana_password: self.grafana_password.map(GrafanaPassword::new),
            port: self.port,
            level: self.level,
        };
        (self.config, overrides)
    }
}
