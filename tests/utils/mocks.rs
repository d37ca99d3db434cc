use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use playerstats::leaderboard::LeaderboardEntry;
use playerstats::statistic::{StatisticRegistry, StatisticType};
use playerstats::storage::{InMemoryBackend, LoadedStats, StatsBackend, StorageError};
use playerstats::user::StatSnapshot;

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// In-memory backend with scriptable failures and delays.
pub struct MockBackend {
    inner: InMemoryBackend,
    rejected: RwLock<HashSet<Uuid>>,
    schema_error: Option<StorageError>,
    unavailable_saves: AtomicU32,
    descending_delays: bool,
    save_calls: AtomicU32,
    schema_calls: AtomicU32,
}

impl MockBackend {
    pub fn new(registry: Arc<StatisticRegistry>) -> Self {
        Self {
            inner: InMemoryBackend::new(registry),
            rejected: RwLock::new(HashSet::new()),
            schema_error: None,
            unavailable_saves: AtomicU32::new(0),
            descending_delays: false,
            save_calls: AtomicU32::new(0),
            schema_calls: AtomicU32::new(0),
        }
    }

    /// `ensure_schema` always fails with `error`.
    pub fn with_schema_error(mut self, error: StorageError) -> Self {
        self.schema_error = Some(error);
        self
    }

    /// Single-statistic saves sleep longer for smaller values, so a later
    /// save would overtake an earlier one without lane ordering.
    pub fn with_descending_delays(mut self) -> Self {
        self.descending_delays = true;
        self
    }

    /// The next `count` saves fail with `Unavailable`.
    pub fn with_unavailable_saves(self, count: u32) -> Self {
        self.unavailable_saves.store(count, Ordering::SeqCst);
        self
    }

    /// Every operation for `uuid` is rejected with a query failure.
    pub async fn reject(&self, uuid: Uuid) {
        self.rejected.write().await.insert(uuid);
    }

    pub fn memory(&self) -> &InMemoryBackend {
        &self.inner
    }

    pub fn save_calls(&self) -> u32 {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn schema_calls(&self) -> u32 {
        self.schema_calls.load(Ordering::SeqCst)
    }

    async fn check(&self, uuid: Uuid) -> Result<(), StorageError> {
        if self.rejected.read().await.contains(&uuid) {
            return Err(StorageError::query("23000", format!("row {uuid} rejected")));
        }
        Ok(())
    }

    fn take_unavailable(&self) -> Result<(), StorageError> {
        let remaining = self
            .unavailable_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => Err(StorageError::Unavailable("scripted outage".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl StatsBackend for MockBackend {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        match &self.schema_error {
            Some(error) => Err(error.clone()),
            None => self.inner.ensure_schema().await,
        }
    }

    async fn save_statistic(
        &self,
        uuid: Uuid,
        name: &str,
        statistic: &StatisticType,
        value: i32,
    ) -> Result<(), StorageError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.take_unavailable()?;
        self.check(uuid).await?;
        if self.descending_delays {
            sleep(Duration::from_millis(50_u64.saturating_sub(value.max(0) as u64))).await;
        }
        self.inner.save_statistic(uuid, name, statistic, value).await
    }

    async fn save_all(&self, snapshot: &StatSnapshot) -> Result<(), StorageError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.take_unavailable()?;
        self.check(snapshot.uuid).await?;
        self.inner.save_all(snapshot).await
    }

    async fn load(&self, uuid: Uuid, name: &str) -> Result<LoadedStats, StorageError> {
        self.check(uuid).await?;
        self.inner.load(uuid, name).await
    }

    async fn column(
        &self,
        statistic: &StatisticType,
    ) -> Result<Vec<LeaderboardEntry>, StorageError> {
        self.inner.column(statistic).await
    }

    async fn player_name(&self, uuid: Uuid) -> Result<Option<String>, StorageError> {
        self.check(uuid).await?;
        self.inner.player_name(uuid).await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await
    }
}
