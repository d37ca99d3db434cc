use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{LoadedStats, RowTable, StatsBackend, StorageError, StoredRow};
use crate::leaderboard::LeaderboardEntry;
use crate::statistic::{StatisticRegistry, StatisticType};
use crate::user::StatSnapshot;

/// In-memory implementation of StatsBackend for development and testing
///
/// Data is lost when the process exits. `set_available(false)` makes every
/// operation fail with [`StorageError::Unavailable`], which is how tests
/// exercise degraded mode without a real database.
pub struct InMemoryBackend {
    columns: Vec<String>,
    rows: RwLock<RowTable>,
    available: AtomicBool,
}

impl InMemoryBackend {
    pub fn new(registry: Arc<StatisticRegistry>) -> Self {
        Self::with_rows(registry, RowTable::new())
    }

    pub fn with_rows(registry: Arc<StatisticRegistry>, rows: RowTable) -> Self {
        Self {
            columns: registry
                .persistent()
                .map(|s| s.name().to_string())
                .collect(),
            rows: RwLock::new(rows),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn stored_value(&self, uuid: Uuid, column: &str) -> Option<i32> {
        self.rows.read().await.get(uuid).map(|row| row.value(column))
    }

    pub async fn insert_raw(&self, key: &str, row: StoredRow) {
        self.rows.write().await.insert_raw(key, row);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable(
                "in-memory store switched off".to_string(),
            ))
        }
    }

    fn has_column(&self, statistic: &StatisticType) -> bool {
        statistic.is_persistent() && self.columns.iter().any(|c| c == statistic.name())
    }
}

#[async_trait]
impl StatsBackend for InMemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.check_available()
    }

    #[instrument(skip(self, name, statistic), fields(statistic = statistic.name()))]
    async fn save_statistic(
        &self,
        uuid: Uuid,
        name: &str,
        statistic: &StatisticType,
        value: i32,
    ) -> Result<(), StorageError> {
        self.check_available()?;
        if !self.has_column(statistic) {
            return Ok(());
        }

        self.rows
            .write()
            .await
            .set_statistic(uuid, name, statistic.name(), value);
        debug!(value, "Statistic saved in memory");
        Ok(())
    }

    #[instrument(skip(self, snapshot), fields(uuid = %snapshot.uuid))]
    async fn save_all(&self, snapshot: &StatSnapshot) -> Result<(), StorageError> {
        self.check_available()?;
        self.rows.write().await.set_all(snapshot, &self.columns);
        debug!("All statistics saved in memory");
        Ok(())
    }

    async fn load(&self, uuid: Uuid, name: &str) -> Result<LoadedStats, StorageError> {
        self.check_available()?;
        Ok(self.rows.write().await.load(uuid, name, &self.columns))
    }

    async fn column(
        &self,
        statistic: &StatisticType,
    ) -> Result<Vec<LeaderboardEntry>, StorageError> {
        self.check_available()?;
        if !self.has_column(statistic) {
            return Ok(Vec::new());
        }
        Ok(self.rows.read().await.column(statistic.name()))
    }

    async fn player_name(&self, uuid: Uuid) -> Result<Option<String>, StorageError> {
        self.check_available()?;
        Ok(self.rows.read().await.name_of(uuid))
    }

    async fn shutdown(&self) {
        debug!("In-memory backend shut down");
    }
}
