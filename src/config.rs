use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::auth::{AuthError, OAuth2ProviderConfig, SecurityConfig};

/// Environment variable prefix, `__` separates nested keys
/// (`SESSIONGATE_SECURITY__MAX_SESSIONS=1`)
pub const ENV_PREFIX: &str = "SESSIONGATE_";

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "sessiongate.toml";

/// Configuration for the sessiongate server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub security: SecurityConfig,
    /// OAuth2 providers by registration name
    pub providers: BTreeMap<String, OAuth2ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit JSON log lines instead of human readable ones
    pub json: bool,
    /// Filter used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info,sessiongate=debug".to_string(),
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file and `SESSIONGATE_*` environment variables.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()));
        let figment = match path {
            Some(path) if !path.exists() => {
                return Err(figment::Error::from(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            Some(path) => figment.merge(Toml::file(path)),
            None => figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        };

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Create config from environment variables and the default file
    pub fn from_env() -> Result<Self, figment::Error> {
        Self::load(None)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.server.host.is_empty() {
            return Err(AuthError::InvalidConfig {
                key: "server.host".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        self.security.validate()?;

        for (name, provider) in &self.providers {
            provider.validate().map_err(|e| AuthError::InvalidConfig {
                key: format!("providers.{}", name),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
