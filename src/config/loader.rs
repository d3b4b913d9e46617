//! Configuration Loader
//!
//! Layers compiled defaults, an optional TOML file and `TASKER_BRIDGE_*`
//! environment variables using the `config` crate, then validates the result.
//!
//! Environment keys use `_` after the prefix and `__` for nesting:
//!
//! ```text
//! TASKER_BRIDGE_BASE_URL=http://tasks:8080
//! TASKER_BRIDGE_RETRY__MAX_ATTEMPTS=5
//! TASKER_BRIDGE_CIRCUIT_BREAKER__ENABLED=false
//! ```

use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};

/// Environment variable prefix for all bridge settings
pub const ENV_PREFIX: &str = "TASKER_BRIDGE";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "TASKER_BRIDGE_CONFIG";

/// Builder for layered configuration loading
#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    file_required: bool,
    env_source: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader pointed at the first config file found in the standard locations
    pub fn discover() -> Self {
        let mut loader = Self::new();
        if let Some(path) = Self::find_config_file() {
            debug!("Loading bridge config from: {}", path.display());
            loader.file = Some(path);
        }
        loader
    }

    /// Read settings from `path`, which must exist
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self.file_required = true;
        self
    }

    /// Replace the process environment with an explicit variable map
    ///
    /// Useful for embedding hosts and for tests that must not touch global state.
    #[must_use]
    pub fn with_env_source<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_source = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Build, deserialize and validate the configuration
    pub fn load(&self) -> BridgeResult<BridgeConfig> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(self.file_required),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.env_source.clone()),
        );

        let config: BridgeConfig = builder
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| BridgeError::configuration(format!("Failed to load config: {e}")))?;

        config.validate()?;

        debug!(
            base_url = %config.base_url,
            request_timeout_ms = config.request_timeout_ms,
            retry_max_attempts = config.retry.max_attempts,
            circuit_breaker_enabled = config.circuit_breaker.enabled,
            "Loaded bridge configuration"
        );

        Ok(config)
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(explicit));
        }

        [
            Path::new("./tasker-bridge.toml"),
            Path::new("./config/tasker-bridge.toml"),
        ]
        .into_iter()
        .find(|path| path.is_file())
        .map(Path::to_path_buf)
    }
}
