//! Server configuration from `UIDKEEP_*` environment variables

use std::time::Duration;
use thiserror::Error;
use uidkeep_core::{AccessControlConfig, CredentialConfig, StoreConfig, SweeperConfig};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub admin_key: String,
    pub store: StoreConfig,
    pub sweeper: SweeperConfig,
    /// `None` when no issuer identity is configured; mirroring then stays off
    pub credential: Option<CredentialConfig>,
    pub access: AccessControlConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Unparsable
    /// numbers fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let secs = |name: &str, default: u64| {
            Duration::from_secs(var(name).and_then(|v| v.parse().ok()).unwrap_or(default))
        };

        let admin_key = var("UIDKEEP_ADMIN_KEY").ok_or(ConfigError::Missing("UIDKEEP_ADMIN_KEY"))?;

        let mut store = StoreConfig::default();
        if let Some(path) = var("UIDKEEP_STORAGE_FILE") {
            store = store.with_path(path);
        }

        let sweeper = SweeperConfig::default().with_interval(secs("UIDKEEP_SWEEP_INTERVAL", 60));

        let credential = match (var("UIDKEEP_ISSUER_UID"), var("UIDKEEP_ISSUER_SECRET")) {
            (Some(identity), Some(secret)) => {
                let mut config = CredentialConfig::new(identity, secret)
                    .with_refresh_interval(secs("UIDKEEP_TOKEN_REFRESH_INTERVAL", 8 * 3600));
                if let Some(url) = var("UIDKEEP_ISSUER_URL") {
                    config = config.with_issuer_url(url);
                }
                Some(config)
            }
            _ => None,
        };

        let mut access = AccessControlConfig::new(admin_key.clone());
        if let Some(url) = var("UIDKEEP_ADD_URL") {
            access = access.with_add_url(url);
        }
        if let Some(url) = var("UIDKEEP_REMOVE_URL") {
            access = access.with_remove_url(url);
        }

        Ok(Self {
            host: var("UIDKEEP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("UIDKEEP_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            admin_key,
            store,
            sweeper,
            credential,
            access,
        })
    }
}
