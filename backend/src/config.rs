use std::env;
use std::path::PathBuf;

use santa_core::{GameError, Roster};
use thiserror::Error;

use crate::coordinator::{GamePaths, DEFAULT_NAMESPACE};
use crate::store::StoreError;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub persist_path: Option<PathBuf>,
    /// Store-less mode: the game document lives in this on-device cache file
    /// and nothing is shared.
    pub cache_path: Option<PathBuf>,
    pub admin_password: String,
    pub roster: Roster,
    pub namespace: String,
    pub seed: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SANTA_ROSTER: {0}")]
    Roster(#[from] GameError),
    #[error("SANTA_NAMESPACE: {0}")]
    Namespace(#[from] StoreError),
    #[error("SANTA_SEED must be an unsigned integer, got {0:?}")]
    Seed(String),
    #[error("PERSIST_PATH and SANTA_CACHE_PATH are mutually exclusive")]
    ConflictingStores,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            persist_path: None,
            cache_path: None,
            admin_password: "changeme".to_string(),
            roster: Roster::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            seed: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any variable source; unset or blank values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("SANTA_BIND") {
            config.bind_addr = addr;
        }
        config.persist_path = get("PERSIST_PATH").map(PathBuf::from);
        config.cache_path = get("SANTA_CACHE_PATH").map(PathBuf::from);
        if config.persist_path.is_some() && config.cache_path.is_some() {
            return Err(ConfigError::ConflictingStores);
        }
        if let Some(password) = get("ADMIN_PASSWORD") {
            config.admin_password = password;
        }
        if let Some(names) = get("SANTA_ROSTER") {
            config.roster = Roster::new(names.split(','))?;
        }
        if let Some(namespace) = get("SANTA_NAMESPACE") {
            GamePaths::new(&namespace)?;
            config.namespace = namespace;
        }
        if let Some(seed) = get("SANTA_SEED") {
            config.seed = Some(seed.trim().parse::<u64>().map_err(|_| ConfigError::Seed(seed))?);
        }
        Ok(config)
    }
}
