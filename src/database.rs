use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{RetryPolicy, StorageConfig};
use crate::executor::KeyedExecutor;
use crate::leaderboard::Leaderboard;
use crate::notice::NoticeBus;
use crate::statistic::{StatisticRegistry, StatisticType};
use crate::storage::{LoadedStats, StatsBackend, StorageError};
use crate::user::{StatSnapshot, StatValues, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl DatabaseOptions {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            workers: config.workers,
            retry: config.retry,
        }
    }
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

/// Result of a load, delivered back to whoever owns the [`User`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Loaded {
        uuid: Uuid,
        values: StatValues,
        created: bool,
    },
    LoadFailed {
        uuid: Uuid,
        kind: &'static str,
    },
    /// A retried load reached the store. In-memory values stay as they are.
    Recovered {
        uuid: Uuid,
    },
}

impl Completion {
    pub fn uuid(&self) -> Uuid {
        match self {
            Completion::Loaded { uuid, .. }
            | Completion::LoadFailed { uuid, .. }
            | Completion::Recovered { uuid } => *uuid,
        }
    }
}

/// Asynchronous persistence for player statistics.
///
/// Every call returns immediately. Work runs on the executor keyed by the
/// player's identifier and waits behind the schema barrier, so nothing touches
/// the store before `ensure_schema` has finished. Storage errors never reach
/// the caller: saves log and drop, reads come back empty.
#[derive(Clone)]
pub struct UserDatabase {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn StatsBackend>,
    registry: Arc<StatisticRegistry>,
    executor: KeyedExecutor<Uuid>,
    retry: RetryPolicy,
    notices: NoticeBus,
    completions: mpsc::UnboundedSender<Completion>,
    // Cleared for the whole session by a schema failure.
    persistence: AtomicBool,
    // Whether ensure_schema has succeeded at least once.
    schema_ready: AtomicBool,
    // Last observed store health, for transition-based notices.
    healthy: AtomicBool,
    // Set when disable() starts; new work is refused from then on.
    disabled: AtomicBool,
    // Set once the final flush has drained and the store is shut down.
    released: AtomicBool,
}

impl UserDatabase {
    /// Starts the schema task and returns the facade together with the
    /// receiving end of the completion channel.
    pub fn start(
        backend: Arc<dyn StatsBackend>,
        registry: Arc<StatisticRegistry>,
        options: DatabaseOptions,
        notices: NoticeBus,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (completions, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            backend,
            registry,
            executor: KeyedExecutor::new(options.workers),
            retry: options.retry,
            notices,
            completions,
            persistence: AtomicBool::new(true),
            schema_ready: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            disabled: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });

        let schema = Arc::clone(&inner);
        inner.executor.spawn_ungated(async move {
            schema.ensure_schema().await;
            schema.executor.open_gate();
        });

        (Self { inner }, receiver)
    }

    /// Waits for the schema barrier and reports whether persistence is on.
    pub async fn ready(&self) -> bool {
        self.inner.executor.gate_opened().await;
        self.is_persistent()
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.persistence.load(Ordering::SeqCst)
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<StatisticRegistry> {
        &self.inner.registry
    }

    pub fn backend_kind(&self) -> &'static str {
        self.inner.backend.kind()
    }

    /// Queues a load; the result arrives as a [`Completion`].
    pub fn load_statistics(&self, user: &User) {
        if self.is_disabled() {
            debug!(uuid = %user.uuid(), "Database disabled, load ignored");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let (uuid, name) = (user.uuid(), user.name().to_string());
        self.inner.executor.submit(uuid, async move {
            let completion = match inner.load(uuid, &name).await {
                Ok(loaded) => Completion::Loaded {
                    uuid,
                    values: loaded.values,
                    created: loaded.created,
                },
                Err(e) => Completion::LoadFailed {
                    uuid,
                    kind: e.kind(),
                },
            };

            if inner.completions.send(completion).is_err() {
                debug!(%uuid, "Completion receiver dropped");
            }
        });
    }

    /// Requeues the load for a user whose last load found the store
    /// unreachable. Saves submitted afterwards run behind it on the same lane.
    /// Returns false when the database no longer accepts work.
    pub fn recover(&self, user: &User) -> bool {
        if self.is_disabled() || !self.is_persistent() {
            debug!(uuid = %user.uuid(), "Persistence off, recovery ignored");
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let (uuid, name) = (user.uuid(), user.name().to_string());
        info!(%uuid, "Retrying statistics load");
        self.inner.executor.submit(uuid, async move {
            let completion = match inner.load(uuid, &name).await {
                Ok(_) => Completion::Recovered { uuid },
                Err(e) => Completion::LoadFailed {
                    uuid,
                    kind: e.kind(),
                },
            };

            if inner.completions.send(completion).is_err() {
                debug!(%uuid, "Completion receiver dropped");
            }
        });
        true
    }

    /// Persists the value `statistic` has right now. Fire-and-forget.
    pub fn save_statistic(&self, user: &User, statistic: &StatisticType) {
        if !statistic.is_persistent() || !self.accepts_save(user) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let (uuid, name, value) = (user.uuid(), user.name().to_string(), user.stat(statistic));
        let statistic = statistic.clone();
        self.inner.executor.submit(uuid, async move {
            inner
                .write("save_statistic", || {
                    inner.backend.save_statistic(uuid, &name, &statistic, value)
                })
                .await;
        });
    }

    /// Persists every persistent statistic in one round trip. Fire-and-forget.
    pub fn save_all_statistic(&self, user: &User) {
        if self.accepts_save(user) {
            self.submit_save_all(user.snapshot(&self.inner.registry));
        }
    }

    /// The whole column, ascending. Empty when the store cannot answer.
    pub async fn get_stats(&self, statistic: &StatisticType) -> Leaderboard {
        match self.try_get_stats(statistic).await {
            Ok(leaderboard) => leaderboard,
            Err(e) => {
                warn!(statistic = statistic.name(), error = %e, "Leaderboard read failed");
                Leaderboard::empty(statistic.name())
            }
        }
    }

    /// Like [`get_stats`](Self::get_stats) but surfaces the failure.
    pub async fn try_get_stats(
        &self,
        statistic: &StatisticType,
    ) -> Result<Leaderboard, StorageError> {
        if !statistic.is_persistent() {
            return Ok(Leaderboard::empty(statistic.name()));
        }
        self.inner.check_accepting()?;

        let inner = Arc::clone(&self.inner);
        let statistic = statistic.clone();
        self.inner
            .executor
            .spawn(async move {
                let entries = inner
                    .read("get_stats", || inner.backend.column(&statistic))
                    .await?;
                Ok::<_, StorageError>(Leaderboard::new(statistic.name(), entries))
            })
            .await
            .map_err(|e| StorageError::query("worker", e.to_string()))?
    }

    /// Stored display name for `uuid`. Absent on any failure.
    pub async fn get_player_name(&self, uuid: Uuid) -> Option<String> {
        if self.inner.check_accepting().is_err() {
            return None;
        }

        let inner = Arc::clone(&self.inner);
        let lookup = self
            .inner
            .executor
            .submit(uuid, async move {
                inner
                    .read("get_player_name", || inner.backend.player_name(uuid))
                    .await
            })
            .await;

        match lookup {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                debug!(%uuid, error = %e, "Player name lookup failed");
                None
            }
            Err(e) => {
                error!(%uuid, error = %e, "Player name lookup panicked");
                None
            }
        }
    }

    /// Resolves once everything already queued for `uuid` has run.
    pub async fn flush(&self, uuid: Uuid) {
        if let Err(e) = self.inner.executor.submit(uuid, async {}).await {
            error!(%uuid, error = %e, "Flush task failed");
        }
    }

    /// Refuses new work, saves every loaded user, waits for those saves and
    /// everything queued before them, then releases the store. Later calls on
    /// this database are logged no-ops.
    #[instrument(skip(self, users))]
    pub async fn disable<'a, I>(&self, users: I)
    where
        I: IntoIterator<Item = &'a User>,
    {
        if self.inner.disabled.swap(true, Ordering::SeqCst) {
            debug!("Database already disabled");
            return;
        }

        let saves: Vec<_> = users
            .into_iter()
            .filter(|user| user.accepts_saves())
            .map(|user| self.submit_save_all(user.snapshot(&self.inner.registry)))
            .collect();
        info!(users = saves.len(), "Flushing online players before shutdown");

        for result in join_all(saves).await {
            if let Err(e) = result {
                error!(error = %e, "Final save task failed");
            }
        }
        self.inner.executor.drain().await;

        self.inner.backend.shutdown().await;
        self.inner.released.store(true, Ordering::SeqCst);
        info!("Statistics database disabled");
    }

    fn accepts_save(&self, user: &User) -> bool {
        if self.is_disabled() {
            debug!(uuid = %user.uuid(), "Database disabled, save ignored");
            return false;
        }
        if !user.accepts_saves() {
            // Saving defaults now would overwrite the stored values.
            debug!(uuid = %user.uuid(), "Stats not loaded yet, save skipped");
            return false;
        }
        true
    }

    fn submit_save_all(&self, snapshot: StatSnapshot) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(snapshot.uuid, async move {
            inner
                .write("save_all_statistic", || inner.backend.save_all(&snapshot))
                .await;
        })
    }
}

impl Inner {
    #[instrument(skip(self), fields(backend = self.backend.kind()))]
    async fn ensure_schema(&self) {
        match self.backend.ensure_schema().await {
            Ok(()) => {
                self.schema_ready.store(true, Ordering::SeqCst);
                info!("Statistics schema ready");
            }
            Err(e @ StorageError::Unavailable(_)) => {
                // Retried lazily by the first operation that reaches the store.
                warn!(error = %e, "Store unavailable during schema setup");
                self.mark_unavailable("ensure_schema", &e);
            }
            Err(e) => {
                self.persistence.store(false, Ordering::SeqCst);
                self.notices.raise_error("ensure_schema", &e);
            }
        }
    }

    /// Submission-time check for reads.
    fn check_accepting(&self) -> Result<(), StorageError> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("database disabled".to_string()));
        }
        self.check_open()
    }

    /// Run-time check for queued work. Work queued before `disable` still runs.
    fn check_open(&self) -> Result<(), StorageError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("store released".to_string()));
        }
        if !self.persistence.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "persistence off after schema failure".to_string(),
            ));
        }
        Ok(())
    }

    /// Reruns schema setup when startup could not reach the store.
    async fn prepare(&self) -> Result<(), StorageError> {
        self.check_open()?;
        if self.schema_ready.load(Ordering::SeqCst) {
            return Ok(());
        }

        match self.backend.ensure_schema().await {
            Ok(()) => {
                self.schema_ready.store(true, Ordering::SeqCst);
                info!("Statistics schema ready after store recovered");
                Ok(())
            }
            Err(e @ StorageError::Unavailable(_)) => Err(e),
            Err(e) => {
                if self.persistence.swap(false, Ordering::SeqCst) {
                    self.notices.raise_error("ensure_schema", &e);
                }
                Err(e)
            }
        }
    }

    async fn load(&self, uuid: Uuid, name: &str) -> Result<LoadedStats, StorageError> {
        let result = match self.prepare().await {
            Ok(()) => self.backend.load(uuid, name).await,
            Err(e) => Err(e),
        };
        self.observe("load_statistics", &result);

        match &result {
            Ok(loaded) => debug!(%uuid, created = loaded.created, "Statistics loaded"),
            Err(e) => warn!(%uuid, error = %e, "Statistics load failed"),
        }
        result
    }

    /// Runs a save with the configured retry policy. Failures are logged and
    /// the update is dropped.
    async fn write<F, Fut>(&self, operation: &'static str, mut attempt: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StorageError>>,
    {
        let mut tries = 0;
        loop {
            let result = match self.prepare().await {
                Ok(()) => attempt().await,
                Err(e) => Err(e),
            };
            self.observe(operation, &result);

            match result {
                Ok(()) => {
                    if tries > 0 {
                        info!(operation, attempt = tries + 1, "Save succeeded after retry");
                    }
                    return;
                }
                Err(e) if e.is_retryable() && tries < self.retry.max_retries => {
                    let delay = self.retry.delay_for(tries);
                    warn!(operation, attempt = tries + 1, ?delay, error = %e, "Save failed, will retry");
                    tokio::time::sleep(delay).await;
                    tries += 1;
                }
                Err(e) => {
                    warn!(operation, code = ?e.code(), error = %e, "Save dropped");
                    return;
                }
            }
        }
    }

    async fn read<T, F, Fut>(&self, operation: &'static str, attempt: F) -> Result<T, StorageError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        self.prepare().await?;
        let result = attempt().await;
        self.observe(operation, &result);
        result
    }

    /// Tracks store health and raises a notice on the healthy to unavailable
    /// transition only.
    fn observe<T>(&self, operation: &str, result: &Result<T, StorageError>) {
        match result {
            Ok(_) => {
                if !self.healthy.swap(true, Ordering::SeqCst) {
                    info!(operation, "Store reachable again");
                }
            }
            Err(e @ StorageError::Unavailable(_)) => self.mark_unavailable(operation, e),
            Err(e) => {
                debug!(operation, kind = e.kind(), code = ?e.code(), "Storage operation rejected");
            }
        }
    }

    fn mark_unavailable(&self, operation: &str, error: &StorageError) {
        if self.released.load(Ordering::SeqCst) || !self.persistence.load(Ordering::SeqCst) {
            return;
        }
        if self.healthy.swap(false, Ordering::SeqCst) {
            self.notices.raise_error(operation, error);
        }
    }
}
