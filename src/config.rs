use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::statistic::is_valid_identifier;

pub const DEFAULT_TABLE: &str = "playerstats";

/// Which [`StatsBackend`](crate::storage::StatsBackend) to open at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Networked database reached through `database_url`.
    Sql,
    /// Local JSON document at `file_path`.
    File,
    /// Nothing survives a restart. Development only.
    #[default]
    Memory,
}

impl StorageKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sql" | "mysql" | "postgres" | "database" => Some(StorageKind::Sql),
            "file" | "flatfile" => Some(StorageKind::File),
            "memory" => Some(StorageKind::Memory),
            _ => None,
        }
    }
}

/// Bounded retry with exponential backoff for saves hitting an unreachable
/// store. `max_retries = 0` keeps the log-and-continue behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 100,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub database_url: Option<String>,
    pub file_path: PathBuf,
    pub table: String,
    pub max_lifetime_ms: u64,
    pub acquire_timeout_ms: u64,
    pub max_connections: u32,
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            database_url: None,
            file_path: PathBuf::from("playerstats.json"),
            table: DEFAULT_TABLE.to_string(),
            max_lifetime_ms: 1_800_000,
            acquire_timeout_ms: 5_000,
            max_connections: 10,
            workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl StorageConfig {
    /// Loads `PLAYERSTATS_CONFIG` (if set), applies environment overrides and
    /// validates the result.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("PLAYERSTATS_CONFIG") {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Applies `DATABASE_URL`, `PLAYERSTATS_STORAGE`, `PLAYERSTATS_TABLE` and
    /// `PLAYERSTATS_FILE` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit_kind = match lookup("PLAYERSTATS_STORAGE") {
            Some(value) => Some(StorageKind::parse(&value).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown storage kind '{value}'"))
            })?),
            None => None,
        };

        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
            if explicit_kind.is_none() && self.kind == StorageKind::Memory {
                self.kind = StorageKind::Sql;
            }
        }
        if let Some(kind) = explicit_kind {
            self.kind = kind;
        }
        if let Some(table) = lookup("PLAYERSTATS_TABLE") {
            self.table = table;
        }
        if let Some(path) = lookup("PLAYERSTATS_FILE") {
            self.file_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_identifier(&self.table) {
            return Err(ConfigError::Invalid(format!(
                "table name '{}' must match [a-z_][a-z0-9_]*",
                self.table
            )));
        }
        if self.kind == StorageKind::Sql && self.database_url.is_none() {
            return Err(ConfigError::Invalid(
                "storage kind 'sql' requires database_url".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}
