use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub graph: GraphConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Alternate construction form: attach to a store addressed by URL
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

/// Graph construction settings
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Storage location (directory). There is no built-in default.
    pub location: PathBuf,
    /// DESTRUCTIVE: delete everything at `location` when the builder opens.
    /// Deliberately has no default.
    pub reset_existing: bool,
    #[serde(default)]
    pub scope: ScopePolicy,
    #[serde(default)]
    pub mode: IngestMode,
    #[serde(default = "default_lowercase_tokens")]
    pub lowercase_tokens: bool,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Close the store on Ctrl-C / SIGTERM, then exit
    #[serde(default = "default_close_on_signal")]
    pub close_on_signal: bool,
}

/// How node identity is bounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopePolicy {
    /// Identity is bounded by the scope passed with each relation (absent scope is global)
    #[default]
    PerSentence,
    /// Scope arguments are ignored; identity is global to the store
    Global,
}

/// What relation ingestion writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestMode {
    /// Endpoint nodes plus a typed edge
    #[default]
    EntitiesAndRelations,
    /// Endpoint nodes only
    EntitiesOnly,
}

/// Store call limits
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Remote store address
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Name of the environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_lowercase_tokens() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_close_on_signal() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in DEPGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("DEPGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_path(&config_path)
    }

    /// Load and validate a specific configuration file
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.graph.location.as_os_str().is_empty() {
            anyhow::bail!("graph.location must not be empty");
        }

        if self.store.timeout_ms == 0 {
            anyhow::bail!("store.timeout_ms must be greater than 0");
        }

        if let Some(remote) = &self.remote {
            if remote.url.trim().is_empty() {
                anyhow::bail!("remote.url must not be empty");
            }
            if let Some(var) = &remote.password_env {
                std::env::var(var).with_context(|| {
                    format!(
                        "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                        var
                    )
                })?;
            }
        }

        Ok(())
    }

    /// Get the storage location
    pub fn location(&self) -> &Path {
        &self.graph.location
    }
}
