use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::StorageError;
use crate::config::StorageConfig;
use crate::notice::{DegradedNotice, NoticeBus};

/// A pooled connection, handed back to the pool when dropped.
pub type ScopedConnection = PoolConnection<Any>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    /// Connections older than this are closed instead of reused.
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &StorageConfig, url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_connections: config.max_connections,
            max_lifetime: config.max_lifetime(),
            acquire_timeout: config.acquire_timeout(),
        }
    }
}

/// Owns the connection pool for the SQL backend.
///
/// A manager whose pool could not be established stays usable: every
/// `acquire` reports [`StorageError::Unavailable`].
#[derive(Debug)]
pub struct ConnectionManager {
    pool: Option<AnyPool>,
}

impl ConnectionManager {
    #[instrument(skip(settings, notices), fields(max_connections = settings.max_connections))]
    pub async fn connect(settings: &PoolSettings, notices: &NoticeBus) -> Self {
        install_default_drivers();

        let result = AnyPoolOptions::new()
            .max_connections(settings.max_connections)
            .max_lifetime(settings.max_lifetime)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.url)
            .await;

        match result {
            Ok(pool) => {
                info!(
                    max_lifetime_secs = settings.max_lifetime.as_secs(),
                    "Database connection pool established"
                );
                Self { pool: Some(pool) }
            }
            Err(e) => {
                let code = match &e {
                    sqlx::Error::Database(db_error) => db_error.code().map(|c| c.into_owned()),
                    _ => None,
                };
                warn!(error = %e, code = ?code, "Could not connect to database");
                notices.raise(DegradedNotice {
                    operation: "connect".to_string(),
                    kind: "unavailable",
                    code,
                    detail: e.to_string(),
                });
                Self::unavailable()
            }
        }
    }

    /// A manager with no pool at all.
    pub fn unavailable() -> Self {
        Self { pool: None }
    }

    pub fn is_available(&self) -> bool {
        self.pool.as_ref().is_some_and(|pool| !pool.is_closed())
    }

    /// Borrows a connection, waiting at most the configured acquire timeout.
    pub async fn acquire(&self) -> Result<ScopedConnection, StorageError> {
        let pool = self.pool.as_ref().ok_or_else(|| {
            StorageError::Unavailable("connection pool was never established".to_string())
        })?;

        pool.acquire().await.map_err(StorageError::from)
    }

    /// Closes every pooled connection. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        match &self.pool {
            Some(pool) if !pool.is_closed() => {
                pool.close().await;
                info!("Database connection pool closed");
            }
            _ => debug!("Connection pool already closed or never established"),
        }
    }
}
