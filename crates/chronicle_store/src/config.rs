use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use chronicle_core::{ChronicleError, ChronicleResult};

const DEFAULT_CONFIG_NAME: &str = "chronicle.json";

/// Ceiling on queued-but-unpersisted records before newest records are
/// dropped. Small on purpose: an unbounded backlog risks exhausting
/// memory and stalling the producer outright.
pub const DEFAULT_MAX_BACKLOG: usize = 256;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_backlog: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChronicleConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub queue: Option<QueueConfig>,
    pub failpoints: Option<Vec<String>>,
}

impl ChronicleConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            queue: Some(QueueConfig {
                max_backlog: Some(DEFAULT_MAX_BACKLOG),
            }),
            failpoints: None,
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> ChronicleResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| ChronicleError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| ChronicleError::storage(format!("read config: {err}")))?;
            let config: ChronicleConfig = serde_json::from_str(&raw)
                .map_err(|err| ChronicleError::invalid(err.to_string()))?;
            return Ok(config);
        }
        let default = ChronicleConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| ChronicleError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| ChronicleError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> ChronicleResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path
                    .clone()
                    .unwrap_or_else(|| "chronicle.sqlite".to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(ChronicleError::invalid("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self) -> Option<&str> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => None,
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Some(url.as_str()),
        }
    }

    pub fn max_backlog(&self) -> usize {
        self.queue
            .as_ref()
            .and_then(|queue| queue.max_backlog)
            .unwrap_or(DEFAULT_MAX_BACKLOG)
    }
}
