// Backing-store variants behind one contract.
//
// Exactly one backend is opened at startup (see `open_backend`); everything
// above this module talks to `dyn StatsBackend` only.

mod connection;
mod errors;
mod file;
mod memory;
pub mod query;
mod rows;
mod sql;

pub use connection::{ConnectionManager, PoolSettings, ScopedConnection};
pub use errors::StorageError;
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use query::{Dialect, QueryBuilder};
pub use rows::{RowTable, StoredRow};
pub use sql::SqlBackend;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::{ConfigError, StorageConfig, StorageKind};
use crate::leaderboard::LeaderboardEntry;
use crate::notice::NoticeBus;
use crate::statistic::{StatisticRegistry, StatisticType};
use crate::user::{StatSnapshot, StatValues};

/// Result of loading one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedStats {
    /// Every persistent statistic, zero for a freshly created row.
    pub values: StatValues,
    /// Whether the row did not exist before this load.
    pub created: bool,
}

/// Durable storage for player statistics.
///
/// Implementations are only ever called from executor workers, never from the
/// authoritative loop, and must not assume a user's row already exists.
#[async_trait]
pub trait StatsBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Creates the table and adds any missing columns. Idempotent.
    async fn ensure_schema(&self) -> Result<(), StorageError>;

    async fn save_statistic(
        &self,
        uuid: Uuid,
        name: &str,
        statistic: &StatisticType,
        value: i32,
    ) -> Result<(), StorageError>;

    /// Writes every persistent statistic in one round trip.
    async fn save_all(&self, snapshot: &StatSnapshot) -> Result<(), StorageError>;

    async fn load(&self, uuid: Uuid, name: &str) -> Result<LoadedStats, StorageError>;

    /// Entire column ascending by value. Malformed rows are skipped.
    async fn column(&self, statistic: &StatisticType)
        -> Result<Vec<LeaderboardEntry>, StorageError>;

    async fn player_name(&self, uuid: Uuid) -> Result<Option<String>, StorageError>;

    /// Releases every resource. Idempotent.
    async fn shutdown(&self);
}

/// Opens the backend selected by `config.kind`.
///
/// Only configuration mistakes fail here; an unreachable database yields a
/// backend in degraded mode.
pub async fn open_backend(
    config: &StorageConfig,
    registry: Arc<StatisticRegistry>,
    notices: &NoticeBus,
) -> Result<Arc<dyn StatsBackend>, ConfigError> {
    config.validate()?;

    let backend: Arc<dyn StatsBackend> = match config.kind {
        StorageKind::Sql => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                ConfigError::Invalid("storage kind 'sql' requires database_url".to_string())
            })?;
            let dialect = Dialect::from_url(url).ok_or_else(|| {
                ConfigError::Invalid("database_url must be a postgres, mysql or sqlite URL".to_string())
            })?;
            let queries = QueryBuilder::new(dialect, &config.table, &registry)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            let connections =
                ConnectionManager::connect(&PoolSettings::from_config(config, url), notices).await;

            Arc::new(SqlBackend::new(connections, queries))
        }
        StorageKind::File => Arc::new(FileBackend::new(config.file_path.clone(), registry)),
        StorageKind::Memory => Arc::new(InMemoryBackend::new(registry)),
    };

    info!(backend = backend.kind(), table = %config.table, "Statistics backend selected");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_open_backend_selects_variant() {
        let registry = Arc::new(StatisticRegistry::with_builtins());
        let notices = NoticeBus::new();

        let memory = open_backend(&StorageConfig::default(), registry.clone(), &notices)
            .await
            .unwrap();
        assert_eq!(memory.kind(), "memory");

        let file_config = StorageConfig {
            kind: StorageKind::File,
            file_path: PathBuf::from("/tmp/unused-stats.json"),
            ..StorageConfig::default()
        };
        let file = open_backend(&file_config, registry, &notices).await.unwrap();
        assert_eq!(file.kind(), "file");
    }

    #[tokio::test]
    async fn test_open_backend_rejects_unknown_scheme() {
        let config = StorageConfig {
            kind: StorageKind::Sql,
            database_url: Some("redis://localhost".to_string()),
            ..StorageConfig::default()
        };

        let result = open_backend(
            &config,
            Arc::new(StatisticRegistry::with_builtins()),
            &NoticeBus::new(),
        )
        .await;
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
