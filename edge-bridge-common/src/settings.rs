use super::logger::parse_level;
use config::{Config, Environment, File};
use edge_bridge_core::link::LinkConfig;
use edge_bridge_error::EBResult;
use edge_bridge_sdk::Identity;
use edge_bridge_upstream::UpstreamConfig;
use serde::Deserialize;
use std::{ops::Deref, path::PathBuf, sync::Arc};
use tracing::Level;

/// Settings file read when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "bridge.toml";

#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    /// Load the optional TOML file at `config_path`, overridden by `EB__*`
    /// environment variables (e.g. `EB__UPSTREAM__HOST`).
    pub fn new(config_path: &str) -> EBResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                Environment::with_prefix("EB")
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub link: LinkConfig,
    /// Sessions opened at startup
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    #[serde(default = "General::log_level_default")]
    pub log_level: String,
    #[serde(default = "General::log_dir_default")]
    pub log_dir: PathBuf,
}

impl Default for General {
    fn default() -> Self {
        General {
            log_level: General::log_level_default(),
            log_dir: General::log_dir_default(),
        }
    }
}

impl General {
    fn log_level_default() -> String {
        "info".into()
    }

    fn log_dir_default() -> PathBuf {
        "logs".into()
    }

    /// Configured level; unknown names yield `None`
    pub fn level(&self) -> Option<Level> {
        parse_level(&self.log_level)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityEntry {
    /// `device` or `device/module`
    pub id: Identity,
    /// Opaque SAS token presented as the MQTT password
    #[serde(default)]
    pub sas_token: Option<String>,
}
