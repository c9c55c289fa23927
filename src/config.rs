//! Service configuration
//!
//! One JSON blob loaded at startup, camelCase keys, every section optional
//! with documented defaults. The `watcher` section is informational only:
//! it is read by the watcher process on the client machine, the service
//! just round-trips it through `/summary`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub service: ServiceConfig,
    pub data: DataConfig,
    pub zoekt: ZoektConfig,
    pub watcher: WatcherConfig,
    pub projects: Vec<ProjectConfig>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Workers serving blocking store reads.
    pub query_pool_size: usize,
    pub query_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3847,
            query_pool_size: 3,
            query_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataConfig {
    pub db_path: PathBuf,
    pub mirror_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/index.db"),
            mirror_dir: PathBuf::from("data/mirror"),
            index_dir: PathBuf::from("data/zoekt-index"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoektConfig {
    /// Indexer parallelism, passed through to the external binary.
    pub parallelism: u32,
    pub web_port: u16,
    pub reindex_debounce_ms: u64,
    /// Files above this size are skipped by the indexer.
    pub file_limit_bytes: u64,
    /// Disable engine supervision entirely; grep falls back to the
    /// internal trigram scanner.
    pub disabled: bool,
}

impl Default for ZoektConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            web_port: 6070,
            reindex_debounce_ms: 5_000,
            file_limit_bytes: 2 * 1024 * 1024,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
    pub reconcile_interval_minutes: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            reconcile_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub name: String,
    pub paths: Vec<PathBuf>,
    pub language: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load a config blob from disk. Unknown keys are ignored so older
    /// service versions can read configs written by newer setup UIs.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON at {}", path.display()))?;
        Ok(config)
    }

    pub fn project_names(&self) -> Vec<String> {
        self.projects.iter().map(|p| p.name.clone()).collect()
    }

    pub fn knows_project(&self, name: &str) -> bool {
        self.projects.is_empty() || self.projects.iter().any(|p| p.name == name)
    }
}
