use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{AnyConnection, Row};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::query::{fit_name, QueryBuilder};
use super::{ConnectionManager, LoadedStats, StatsBackend, StorageError};
use crate::leaderboard::LeaderboardEntry;
use crate::statistic::StatisticType;
use crate::user::{StatSnapshot, StatValues};

/// Relational backend reached through a pooled `sqlx` connection.
pub struct SqlBackend {
    connections: ConnectionManager,
    queries: QueryBuilder,
}

impl SqlBackend {
    pub fn new(connections: ConnectionManager, queries: QueryBuilder) -> Self {
        Self {
            connections,
            queries,
        }
    }

    pub fn queries(&self) -> &QueryBuilder {
        &self.queries
    }

    async fn insert_row(
        &self,
        conn: &mut AnyConnection,
        id: &str,
        name: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(&self.queries.insert_user())
            .bind(id.to_string())
            .bind(fit_name(name))
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn execute_update_all(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        snapshot: &StatSnapshot,
    ) -> Result<u64, StorageError> {
        let mut query = sqlx::query(sql);
        for column in self.queries.columns() {
            query = query.bind(snapshot.value(column));
        }

        let result = query.bind(snapshot.uuid.to_string()).execute(conn).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StatsBackend for SqlBackend {
    fn kind(&self) -> &'static str {
        "sql"
    }

    #[instrument(skip(self), fields(table = %self.queries.table()))]
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        let mut conn = self.connections.acquire().await?;

        sqlx::query(&self.queries.create_table())
            .execute(&mut *conn)
            .await
            .map_err(|e| schema_error("create table", e))?;

        for migration in self.queries.migrations() {
            match sqlx::query(&migration.sql).execute(&mut *conn).await {
                Ok(_) => info!(column = %migration.column, "Added missing column"),
                Err(e) if is_duplicate_column(&e) => {
                    debug!(column = %migration.column, "Column already present")
                }
                Err(e) => {
                    return Err(schema_error(
                        &format!("add column {}", migration.column),
                        e,
                    ))
                }
            }
        }

        info!("Statistics schema ready");
        Ok(())
    }

    #[instrument(skip(self, name, statistic), fields(statistic = statistic.name()))]
    async fn save_statistic(
        &self,
        uuid: Uuid,
        name: &str,
        statistic: &StatisticType,
        value: i32,
    ) -> Result<(), StorageError> {
        let Some(sql) = self.queries.update_statistic(statistic) else {
            debug!("Statistic has no column, nothing to save");
            return Ok(());
        };

        let id = uuid.to_string();
        let mut conn = self.connections.acquire().await?;

        let result = sqlx::query(&sql)
            .bind(value)
            .bind(id.clone())
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            debug!("No row updated, creating it before retrying");
            self.insert_row(&mut conn, &id, name).await?;
            sqlx::query(&sql)
                .bind(value)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    #[instrument(skip(self, snapshot), fields(uuid = %snapshot.uuid))]
    async fn save_all(&self, snapshot: &StatSnapshot) -> Result<(), StorageError> {
        let Some(sql) = self.queries.update_all() else {
            return Ok(());
        };

        let mut conn = self.connections.acquire().await?;

        if self.execute_update_all(&mut conn, &sql, snapshot).await? == 0 {
            debug!("No row updated, creating it before retrying");
            self.insert_row(&mut conn, &snapshot.uuid.to_string(), &snapshot.name)
                .await?;
            self.execute_update_all(&mut conn, &sql, snapshot).await?;
        }

        Ok(())
    }

    #[instrument(skip(self, name))]
    async fn load(&self, uuid: Uuid, name: &str) -> Result<LoadedStats, StorageError> {
        let id = uuid.to_string();
        let name = fit_name(name);
        let mut conn = self.connections.acquire().await?;

        sqlx::query(&self.queries.update_name())
            .bind(name.clone())
            .bind(id.clone())
            .execute(&mut *conn)
            .await?;

        let row = sqlx::query(&self.queries.select_user())
            .bind(id.clone())
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            self.insert_row(&mut conn, &id, &name).await?;
            debug!("Created row for new player");

            let values = self
                .queries
                .columns()
                .iter()
                .map(|column| (column.clone(), 0))
                .collect();
            return Ok(LoadedStats {
                values,
                created: true,
            });
        };

        let mut values = StatValues::with_capacity(self.queries.columns().len());
        for column in self.queries.columns() {
            let raw: i64 = row.try_get(column.as_str())?;
            let value = i32::try_from(raw).map_err(|_| {
                StorageError::MalformedRecord(format!("{column} = {raw} is out of range"))
            })?;
            values.insert(column.clone(), value);
        }

        debug!("Loaded stored statistics");
        Ok(LoadedStats {
            values,
            created: false,
        })
    }

    #[instrument(skip(self, statistic), fields(statistic = statistic.name()))]
    async fn column(
        &self,
        statistic: &StatisticType,
    ) -> Result<Vec<LeaderboardEntry>, StorageError> {
        let Some(sql) = self.queries.select_column(statistic) else {
            return Ok(Vec::new());
        };

        let mut conn = self.connections.acquire().await?;
        let mut rows = sqlx::query(&sql).fetch(&mut *conn);
        let mut entries = Vec::new();

        while let Some(row) = rows.try_next().await? {
            let identifier: Option<String> = match row.try_get(0) {
                Ok(identifier) => identifier,
                Err(e) => {
                    warn!(error = %e, "Skipping row with unreadable identifier");
                    continue;
                }
            };
            let Some(identifier) = identifier else {
                continue;
            };
            let Ok(uuid) = Uuid::parse_str(identifier.trim()) else {
                warn!(identifier = %identifier, "Skipping row with malformed identifier");
                continue;
            };

            let value = row
                .try_get::<i64, _>(1)
                .ok()
                .and_then(|raw| i32::try_from(raw).ok());
            match value {
                Some(value) => entries.push(LeaderboardEntry { uuid, value }),
                None => warn!(%uuid, "Skipping row with malformed value"),
            }
        }

        debug!(rows = entries.len(), "Read statistic column");
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn player_name(&self, uuid: Uuid) -> Result<Option<String>, StorageError> {
        let mut conn = self.connections.acquire().await?;

        let row = sqlx::query(&self.queries.select_name())
            .bind(uuid.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>(0)?)),
            None => Ok(None),
        }
    }

    async fn shutdown(&self) {
        self.connections.shutdown().await;
    }
}

/// Postgres reports SQLSTATE 42701, MySQL 42S21 (error 1060), SQLite only
/// says so in the message.
fn is_duplicate_column(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => {
            matches!(db_error.code().as_deref(), Some("42701" | "42S21" | "1060"))
                || db_error
                    .message()
                    .to_ascii_lowercase()
                    .contains("duplicate column")
        }
        _ => false,
    }
}

fn schema_error(step: &str, error: sqlx::Error) -> StorageError {
    match StorageError::from(error) {
        StorageError::Unavailable(message) => StorageError::Unavailable(message),
        other => StorageError::SchemaFailure(format!("{step}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::NoticeBus;
    use crate::statistic::StatisticRegistry;
    use crate::storage::{Dialect, PoolSettings};
    use std::time::Duration;

    async fn sqlite_backend(dir: &tempfile::TempDir, registry: &StatisticRegistry) -> SqlBackend {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("stats.db").display());
        let settings = PoolSettings {
            url,
            max_connections: 2,
            max_lifetime: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(2),
        };
        let connections = ConnectionManager::connect(&settings, &NoticeBus::new()).await;
        let queries = QueryBuilder::new(Dialect::Sqlite, "playerstats", registry).unwrap();
        SqlBackend::new(connections, queries)
    }

    fn registry(names: &[&str]) -> StatisticRegistry {
        names
            .iter()
            .fold(StatisticRegistry::builder(), |builder, name| {
                builder.register(StatisticType::persistent(name)).unwrap()
            })
            .build()
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&["kills", "deaths"]);
        let backend = sqlite_backend(&dir, &registry).await;

        backend.ensure_schema().await.unwrap();
        let uuid = Uuid::new_v4();
        backend.load(uuid, "Steve").await.unwrap();
        backend
            .save_statistic(uuid, "Steve", &StatisticType::persistent("kills"), 4)
            .await
            .unwrap();

        backend.ensure_schema().await.unwrap();

        let loaded = backend.load(uuid, "Steve").await.unwrap();
        assert_eq!(loaded.values.get("kills"), Some(&4));
    }

    #[tokio::test]
    async fn test_schema_evolution_adds_new_statistic_column() {
        let dir = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();

        let old = sqlite_backend(&dir, &registry(&["kills"])).await;
        old.ensure_schema().await.unwrap();
        old.load(uuid, "Steve").await.unwrap();
        old.save_statistic(uuid, "Steve", &StatisticType::persistent("kills"), 9)
            .await
            .unwrap();
        old.shutdown().await;

        let new = sqlite_backend(&dir, &registry(&["kills", "orbs"])).await;
        new.ensure_schema().await.unwrap();

        let loaded = new.load(uuid, "Steve").await.unwrap();
        assert_eq!(loaded.values.get("kills"), Some(&9));
        assert_eq!(loaded.values.get("orbs"), Some(&0));
    }

    #[tokio::test]
    async fn test_save_statistic_creates_missing_row() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sqlite_backend(&dir, &registry(&["kills"])).await;
        backend.ensure_schema().await.unwrap();

        let uuid = Uuid::new_v4();
        backend
            .save_statistic(uuid, "Ghost", &StatisticType::persistent("kills"), 3)
            .await
            .unwrap();

        assert_eq!(backend.player_name(uuid).await.unwrap().as_deref(), Some("Ghost"));
        let loaded = backend.load(uuid, "Ghost").await.unwrap();
        assert!(!loaded.created);
        assert_eq!(loaded.values.get("kills"), Some(&3));
    }

    #[tokio::test]
    async fn test_column_skips_malformed_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sqlite_backend(&dir, &registry(&["kills"])).await;
        backend.ensure_schema().await.unwrap();

        let good = Uuid::new_v4();
        backend
            .save_statistic(good, "Good", &StatisticType::persistent("kills"), 2)
            .await
            .unwrap();

        let mut conn = backend.connections.acquire().await.unwrap();
        sqlx::query(
            "INSERT INTO \"playerstats\" (\"uuid\", \"name\", \"kills\") VALUES ('garbage', 'Bad', 1)",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
        drop(conn);

        let column = backend
            .column(&StatisticType::persistent("kills"))
            .await
            .unwrap();
        assert_eq!(column, vec![LeaderboardEntry { uuid: good, value: 2 }]);
    }

    #[tokio::test]
    async fn test_unknown_player_name_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sqlite_backend(&dir, &registry(&["kills"])).await;
        backend.ensure_schema().await.unwrap();

        assert_eq!(backend.player_name(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = sqlite_backend(&dir, &registry(&["kills"])).await;
        backend.ensure_schema().await.unwrap();
        backend.shutdown().await;

        let result = backend.load(Uuid::new_v4(), "Late").await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }
}
