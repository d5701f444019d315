use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use crate::identity::IdentityConfig;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "TRAINLOG_CONFIG";
/// Prefix for environment overrides, e.g. `TRAINLOG_API__BASE_URL`.
pub const ENV_PREFIX: &str = "TRAINLOG_";

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0: API endpoint, identity provider, cache and logging.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct ConfigV1 {
    pub api: ApiConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the training-log API lives and how long we wait for it.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
    /// Upper bound on how long a forced sign-out waits for the session store.
    #[serde(default = "default_sign_out_timeout_in_ms")]
    pub sign_out_timeout_in_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached query results before LRU eviction.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Age after which a cached result is refetched on the next read.
    #[serde(default = "default_stale_time_in_ms")]
    pub stale_time_in_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            stale_time_in_ms: default_stale_time_in_ms(),
        }
    }
}

fn default_timeout_in_ms() -> u64 {
    10_000
}

fn default_sign_out_timeout_in_ms() -> u64 {
    1_000
}

fn default_capacity() -> usize {
    256
}

fn default_stale_time_in_ms() -> u64 {
    60_000
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error loading configuration: {0}")]
    Figment(#[from] Box<figment::Error>),
}

/// Resolve the config file: `TRAINLOG_CONFIG` if set, else `./config.yaml`.
pub fn default_config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./config.yaml"))
}

/// Load config from a YAML file, with `TRAINLOG_*` environment overrides on top.
pub fn load_config(path: &Path) -> Result<ConfigV1, ConfigError> {
    let figment = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));
    extract(figment)
}

/// Load config from an in-memory YAML document (no environment overlay).
pub fn load_config_str(yaml: &str) -> Result<ConfigV1, ConfigError> {
    extract(Figment::new().merge(Yaml::string(yaml)))
}

fn extract(figment: Figment) -> Result<ConfigV1, ConfigError> {
    let config = figment.extract::<Config>().map_err(Box::new)?;
    match config {
        Config::ConfigV1(c) => Ok(c),
    }
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() -> Result<(), serde_json::Error> {
    let schema = schema_for!(Config);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
