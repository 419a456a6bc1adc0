use std::{net::IpAddr, path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use genbatch::{job::JobConfig, OrchestratorConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub repository: RepositoryConfig,
    /// Defaults for new jobs; a `create_job` request may override them.
    #[serde(default)]
    pub jobs: JobConfig,
}

impl Config {
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::new()
            .with_job(self.jobs)
            .with_worker_timeout(self.worker.timeout())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Jobs only live as long as the process.
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// Connection string, required for [`StoreKind::Postgres`].
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

/// The HTTP endpoint performing the generation of a single work item.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub url: String,
    #[serde(default = "default_worker_timeout_secs")]
    pub timeout_secs: u64,
}

impl WorkerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_worker_timeout_secs() -> u64 {
    300
}

/// The HTTP endpoint listing the work items eligible for generation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryConfig {
    pub url: String,
}

/// Load configuration from file with environment variable overrides.
///
/// Variables are prefixed with `GENBATCH_` and nested with `__`, e.g. `GENBATCH_SERVER__PORT`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("GENBATCH_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }
    if config.store.kind == StoreKind::Postgres && config.store.url.is_none() {
        return Err(invalid("store.url is required for the postgres store"));
    }
    if config.store.max_connections == 0 {
        return Err(invalid("store.max_connections cannot be 0"));
    }
    if config.worker.url.trim().is_empty() {
        return Err(invalid("worker.url cannot be empty"));
    }
    if config.worker.timeout_secs == 0 {
        return Err(invalid("worker.timeout_secs cannot be 0"));
    }
    if config.repository.url.trim().is_empty() {
        return Err(invalid("repository.url cannot be empty"));
    }
    config
        .jobs
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("jobs: {e}")))
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_owned())
}
