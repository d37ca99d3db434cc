use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use playerstats::{
    open_backend, DatabaseOptions, NoticeBus, RetryPolicy, StatisticRegistry, StatsBackend,
    StorageConfig, StorageKind, UserDatabase, UserManager,
};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestSetup {
    pub registry: Arc<StatisticRegistry>,
    pub notices: NoticeBus,
    pub backend: Arc<dyn StatsBackend>,
    pub database: UserDatabase,
    pub manager: UserManager,
    pub config: StorageConfig,
    // Keeps SQLite/JSON files alive for the duration of the test.
    pub dir: TempDir,
}

impl TestSetup {
    /// Joins a player and waits until their stored values are applied.
    pub async fn join_loaded(&mut self, uuid: Uuid, name: &str) {
        self.manager.join(uuid, name);
        self.settle(uuid).await;
    }

    /// Waits for queued work for `uuid` and applies any completions.
    pub async fn settle(&mut self, uuid: Uuid) {
        self.database.flush(uuid).await;
        self.manager.apply_completions();
    }

    /// A second database over the same backing files, as after a restart.
    pub async fn reopen(&self) -> (UserDatabase, UserManager) {
        let backend = open_backend(&self.config, Arc::clone(&self.registry), &self.notices)
            .await
            .expect("reopen backend");
        let (database, completions) = UserDatabase::start(
            backend,
            Arc::clone(&self.registry),
            DatabaseOptions::from_config(&self.config),
            self.notices.clone(),
        );
        let manager = UserManager::new(database.clone(), completions);
        (database, manager)
    }
}

pub struct TestSetupBuilder {
    kind: StorageKind,
    backend: Option<Arc<dyn StatsBackend>>,
    registry: Option<Arc<StatisticRegistry>>,
    retry: RetryPolicy,
    workers: usize,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            kind: StorageKind::Memory,
            backend: None,
            registry: None,
            retry: RetryPolicy::disabled(),
            workers: 4,
        }
    }

    pub fn with_sqlite(mut self) -> Self {
        self.kind = StorageKind::Sql;
        self
    }

    pub fn with_file(mut self) -> Self {
        self.kind = StorageKind::File;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn StatsBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_registry(mut self, registry: Arc<StatisticRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_retry(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.retry = RetryPolicy {
            max_retries,
            base_delay_ms,
        };
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub async fn build(self) -> TestSetup {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(StatisticRegistry::with_builtins()));
        let notices = NoticeBus::new();

        let config = StorageConfig {
            kind: self.kind,
            database_url: Some(format!(
                "sqlite://{}?mode=rwc",
                dir.path().join("stats.db").display()
            )),
            file_path: dir.path().join("stats.json"),
            // One connection keeps SQLite writers from contending for the lock.
            max_connections: 1,
            workers: self.workers,
            retry: self.retry,
            ..StorageConfig::default()
        };

        let backend = match self.backend {
            Some(backend) => backend,
            None => open_backend(&config, Arc::clone(&registry), &notices)
                .await
                .expect("open backend"),
        };

        let (database, completions) = UserDatabase::start(
            Arc::clone(&backend),
            Arc::clone(&registry),
            DatabaseOptions::from_config(&config),
            notices.clone(),
        );
        let manager = UserManager::new(database.clone(), completions);

        TestSetup {
            registry,
            notices,
            backend,
            database,
            manager,
            config,
            dir,
        }
    }
}

impl Default for TestSetupBuilder {
    fn default() -> Self {
        Self::new()
    }
}
