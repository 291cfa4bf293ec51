//! Hippocampus configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scheduler::{JobKind, ScheduledJob};

/// Main Hippocampus configuration
///
/// Built once at startup and handed to each component. Limits and
/// classification thresholds are fixed and deliberately absent here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HippocampusConfig {
    /// Document store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP tool surface
    #[serde(default)]
    pub server: ServerConfig,

    /// Periodic pipeline runs
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl HippocampusConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `path` if given, else from [`default_path`] if it exists,
    /// else fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }
}

/// `~/.hippocampus/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|h| h.join(".hippocampus").join("config.toml"))
}

/// Which [`DocumentStore`](crate::store::DocumentStore) to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Elasticsearch,
    /// Process-local store; contents are lost on exit
    Memory,
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Base URL of the Elasticsearch-compatible endpoint
    pub url: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Timeout for bulk writes in seconds
    pub bulk_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Elasticsearch,
            url: "http://localhost:9200".to_string(),
            api_key_env: "ES_API_KEY".to_string(),
            timeout_secs: 30,
            bulk_timeout_secs: 60,
        }
    }
}

impl StoreConfig {
    /// Resolve the API key from the environment. An unset or empty
    /// variable means no `Authorization` header is sent.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins; empty allows any
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run the periodic jobs alongside the server
    pub enabled: bool,

    /// Consolidation period (default 6 hours)
    pub consolidate_interval_secs: u64,

    /// Blindspot report period (default 24 hours)
    pub blindspot_interval_secs: u64,

    /// Domain sync period (default 1 hour)
    pub sync_interval_secs: u64,

    /// Follow every consolidation with a domain sync
    pub sync_after_consolidate: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            consolidate_interval_secs: 21_600,
            blindspot_interval_secs: 86_400,
            sync_interval_secs: 3_600,
            sync_after_consolidate: true,
        }
    }
}

impl SchedulerConfig {
    /// The three independent jobs described by this configuration.
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        let consolidate = if self.sync_after_consolidate {
            JobKind::ConsolidateThenSync
        } else {
            JobKind::Consolidate
        };
        vec![
            ScheduledJob::new(consolidate, Duration::from_secs(self.consolidate_interval_secs)),
            ScheduledJob::new(JobKind::Blindspot, Duration::from_secs(self.blindspot_interval_secs)),
            ScheduledJob::new(JobKind::Sync, Duration::from_secs(self.sync_interval_secs)),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("consolidate_interval_secs", self.consolidate_interval_secs),
            ("blindspot_interval_secs", self.blindspot_interval_secs),
            ("sync_interval_secs", self.sync_interval_secs),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        match zero {
            Some((name, _)) => Err(Error::Config(format!("scheduler.{} must be > 0", name))),
            None => Ok(()),
        }
    }
}
