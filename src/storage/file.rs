use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{LoadedStats, RowTable, StatsBackend, StorageError};
use crate::leaderboard::LeaderboardEntry;
use crate::statistic::{StatisticRegistry, StatisticType};
use crate::user::StatSnapshot;

/// Local-file backend: one JSON document holding every row.
///
/// The document is read once by `ensure_schema` and rewritten after every
/// mutation through a temporary file and a rename, so a crash mid-write
/// leaves the previous version intact.
pub struct FileBackend {
    path: PathBuf,
    columns: Vec<String>,
    // `None` until the file has been opened, and again after shutdown.
    rows: Mutex<Option<RowTable>>,
}

impl FileBackend {
    pub fn new(path: PathBuf, registry: Arc<StatisticRegistry>) -> Self {
        Self {
            path,
            columns: registry
                .persistent()
                .map(|s| s.name().to_string())
                .collect(),
            rows: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn has_column(&self, statistic: &StatisticType) -> bool {
        statistic.is_persistent() && self.columns.iter().any(|c| c == statistic.name())
    }

    async fn read_table(&self) -> Result<RowTable, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(RowTable::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                StorageError::SchemaFailure(format!(
                    "{} is not a valid statistics file: {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RowTable::new()),
            Err(e) => Err(StorageError::SchemaFailure(format!(
                "could not read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write_table(&self, table: &RowTable) -> Result<(), StorageError> {
        let contents = serde_json::to_vec_pretty(table)
            .map_err(|e| StorageError::query("serialize", e.to_string()))?;

        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        tokio::fs::write(&temporary, contents)
            .await
            .map_err(|e| StorageError::Unavailable(format!("write {}: {e}", temporary.display())))?;
        tokio::fs::rename(&temporary, &self.path)
            .await
            .map_err(|e| StorageError::Unavailable(format!("replace {}: {e}", self.path.display())))?;
        Ok(())
    }

    /// Applies `change` to a copy of the open table and swaps it in only
    /// after the copy is on disk.
    async fn mutate<T, F>(&self, change: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut RowTable) -> T,
    {
        let mut guard = self.rows.lock().await;
        let mut table = guard.as_ref().ok_or_else(not_open)?.clone();
        let output = change(&mut table);
        self.write_table(&table).await?;
        *guard = Some(table);
        Ok(output)
    }

    async fn read<T, F>(&self, view: F) -> Result<T, StorageError>
    where
        F: FnOnce(&RowTable) -> T,
    {
        let guard = self.rows.lock().await;
        let table = guard.as_ref().ok_or_else(not_open)?;
        Ok(view(table))
    }
}

fn not_open() -> StorageError {
    StorageError::Unavailable("statistics file is not open".to_string())
}

#[async_trait]
impl StatsBackend for FileBackend {
    fn kind(&self) -> &'static str {
        "file"
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        let mut guard = self.rows.lock().await;
        if guard.is_some() {
            debug!("Statistics file already open");
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::SchemaFailure(format!("could not create {}: {e}", parent.display()))
            })?;
        }

        let table = self.read_table().await?;
        self.write_table(&table).await?;
        info!(rows = table.len(), "Statistics file opened");
        *guard = Some(table);
        Ok(())
    }

    async fn save_statistic(
        &self,
        uuid: Uuid,
        name: &str,
        statistic: &StatisticType,
        value: i32,
    ) -> Result<(), StorageError> {
        if !self.has_column(statistic) {
            return Ok(());
        }
        self.mutate(|table| table.set_statistic(uuid, name, statistic.name(), value))
            .await
    }

    async fn save_all(&self, snapshot: &StatSnapshot) -> Result<(), StorageError> {
        self.mutate(|table| table.set_all(snapshot, &self.columns))
            .await
    }

    async fn load(&self, uuid: Uuid, name: &str) -> Result<LoadedStats, StorageError> {
        self.mutate(|table| table.load(uuid, name, &self.columns))
            .await
    }

    async fn column(
        &self,
        statistic: &StatisticType,
    ) -> Result<Vec<LeaderboardEntry>, StorageError> {
        if !self.has_column(statistic) {
            return Ok(Vec::new());
        }
        self.read(|table| table.column(statistic.name())).await
    }

    async fn player_name(&self, uuid: Uuid) -> Result<Option<String>, StorageError> {
        self.read(|table| table.name_of(uuid)).await
    }

    async fn shutdown(&self) {
        let mut guard = self.rows.lock().await;
        if let Some(table) = guard.take() {
            if let Err(e) = self.write_table(&table).await {
                warn!(error = %e, "Final write of statistics file failed");
            }
            info!("Statistics file closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistic::BuiltinStatistic;

    fn registry() -> Arc<StatisticRegistry> {
        Arc::new(StatisticRegistry::with_builtins())
    }

    #[tokio::test]
    async fn test_operations_before_open_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("stats.json"), registry());

        let result = backend.load(Uuid::new_v4(), "Steve").await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.json");
        let uuid = Uuid::new_v4();
        let kills = BuiltinStatistic::Kills.statistic_type();

        let backend = FileBackend::new(path.clone(), registry());
        backend.ensure_schema().await.unwrap();
        backend.load(uuid, "Steve").await.unwrap();
        backend.save_statistic(uuid, "Steve", &kills, 21).await.unwrap();
        backend.shutdown().await;

        let reopened = FileBackend::new(path, registry());
        reopened.ensure_schema().await.unwrap();
        let loaded = reopened.load(uuid, "Steve").await.unwrap();

        assert!(!loaded.created);
        assert_eq!(loaded.values.get("kills"), Some(&21));
        assert_eq!(
            reopened.player_name(uuid).await.unwrap().as_deref(),
            Some("Steve")
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_table_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let uuid = Uuid::new_v4();
        let kills = BuiltinStatistic::Kills.statistic_type();

        let backend = FileBackend::new(nested.join("stats.json"), registry());
        backend.ensure_schema().await.unwrap();
        backend.save_statistic(uuid, "Steve", &kills, 3).await.unwrap();

        tokio::fs::remove_dir_all(&nested).await.unwrap();
        let result = backend.save_statistic(uuid, "Steve", &kills, 8).await;

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(
            backend.column(&kills).await.unwrap(),
            vec![LeaderboardEntry { uuid, value: 3 }]
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_is_schema_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let backend = FileBackend::new(path, registry());
        let result = backend.ensure_schema().await;
        assert!(matches!(result, Err(StorageError::SchemaFailure(_))));
    }

    #[tokio::test]
    async fn test_ensure_schema_twice_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("stats.json"), registry());
        let uuid = Uuid::new_v4();

        backend.ensure_schema().await.unwrap();
        backend
            .save_statistic(uuid, "Alex", &BuiltinStatistic::Deaths.statistic_type(), 3)
            .await
            .unwrap();
        backend.ensure_schema().await.unwrap();

        let column = backend
            .column(&BuiltinStatistic::Deaths.statistic_type())
            .await
            .unwrap();
        assert_eq!(column, vec![LeaderboardEntry { uuid, value: 3 }]);
    }

    #[tokio::test]
    async fn test_file_with_malformed_identifier_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let good = Uuid::new_v4();
        tokio::fs::write(
            &path,
            format!(
                r#"{{"{good}": {{"name": "Good", "stats": {{"kills": 4}}}},
                    "broken-id": {{"name": "Bad", "stats": {{"kills": 9}}}}}}"#
            ),
        )
        .await
        .unwrap();

        let backend = FileBackend::new(path, registry());
        backend.ensure_schema().await.unwrap();

        let column = backend
            .column(&BuiltinStatistic::Kills.statistic_type())
            .await
            .unwrap();
        assert_eq!(column, vec![LeaderboardEntry { uuid: good, value: 4 }]);
    }
}
