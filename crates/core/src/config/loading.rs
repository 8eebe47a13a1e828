//! Configuration loading from files and environment variables

use crate::error::{Error, Result};
use config::{Config as ConfigLib, ConfigBuilder as LibConfigBuilder, Environment, File};
use std::path::Path;

use super::defaults::*;
use super::{global_config_path, Config};

/// Helper to set a config default with consistent error mapping
fn set_config_default<T: Into<config::Value>>(
    builder: LibConfigBuilder<config::builder::DefaultState>,
    key: &str,
    value: T,
) -> Result<LibConfigBuilder<config::builder::DefaultState>> {
    builder
        .set_default(key, value)
        .map_err(|e| Error::config(format!("Failed to set {key} default: {e}")))
}

impl Config {
    /// Loads configuration from a TOML file with environment variable overrides
    ///
    /// Environment variables are prefixed with `FLEETINDEX_` and use double underscores
    /// for nested values. For example:
    /// - `FLEETINDEX_MONITOR__TIMEOUT_SECS=3600`
    /// - `FLEETINDEX_SERVER__API_KEYS=key-one,key-two`
    pub fn from_file(path: &Path) -> Result<Self> {
        let builder = ConfigLib::builder();

        // Section defaults are set explicitly: the config crate doesn't apply
        // serde defaults for keys that only come from the environment
        let builder = set_config_default(
            builder,
            "monitor.poll_interval_ms",
            default_poll_interval_ms() as i64,
        )?;
        let builder = set_config_default(
            builder,
            "monitor.timeout_secs",
            default_monitor_timeout_secs() as i64,
        )?;
        let builder = set_config_default(builder, "dispatch.cancel_on_failure", false)?;
        let builder = set_config_default(builder, "dispatch.check_prerequisites", false)?;
        let builder = set_config_default(builder, "server.host", default_server_host())?;
        let builder =
            set_config_default(builder, "server.port", default_server_port() as i64)?;
        let builder =
            set_config_default(builder, "server.require_auth", default_require_auth())?;
        let builder = set_config_default(builder, "index.model_name", default_model())?;
        let mut builder = set_config_default(
            builder,
            "index.embedding_dim",
            default_embedding_dim() as i64,
        )?;

        // Add the config file if it exists
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        // Add environment variables with FLEETINDEX_ prefix
        builder = builder.add_source(
            Environment::with_prefix("FLEETINDEX")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.api_keys")
                .with_list_parse_key("server.allowed_origins")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize config: {e}")))
    }

    /// Creates a config from a TOML string (useful for testing)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from a single file
    ///
    /// Precedence (lowest to highest):
    /// 1. Hardcoded defaults
    /// 2. Config file (~/.fleetindex/config.toml or custom --config path)
    /// 3. Environment variables (FLEETINDEX_*)
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => global_config_path()?,
        };
        Self::from_file(&path)
    }
}
