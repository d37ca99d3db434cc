use thiserror::Error;

/// Failure taxonomy for every storage operation.
///
/// None of these are fatal to the host; callers log them and degrade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Schema failure: {0}")]
    SchemaFailure(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Query failed ({code}): {message}")]
    QueryFailure { code: String, message: String },
}

impl StorageError {
    pub fn query(code: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::QueryFailure {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Unavailable(_) => "unavailable",
            StorageError::SchemaFailure(_) => "schema_failure",
            StorageError::MalformedRecord(_) => "malformed_record",
            StorageError::QueryFailure { .. } => "query_failure",
        }
    }

    /// Store-provided diagnostic code, when there is one.
    pub fn code(&self) -> Option<&str> {
        match self {
            StorageError::QueryFailure { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Only an unreachable store is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(db_error) => StorageError::QueryFailure {
                code: db_error
                    .code()
                    .map(|code| code.into_owned())
                    .unwrap_or_else(|| "unknown".to_string()),
                message: db_error.message().to_string(),
            },
            sqlx::Error::PoolTimedOut => {
                StorageError::Unavailable("timed out acquiring a connection".to_string())
            }
            sqlx::Error::PoolClosed => {
                StorageError::Unavailable("connection pool is closed".to_string())
            }
            sqlx::Error::Io(e) => StorageError::Unavailable(e.to_string()),
            sqlx::Error::Tls(e) => StorageError::Unavailable(e.to_string()),
            sqlx::Error::ColumnNotFound(column) => {
                StorageError::MalformedRecord(format!("missing column {column}"))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                StorageError::MalformedRecord(format!("column {index}: {source}"))
            }
            sqlx::Error::Decode(e) => StorageError::MalformedRecord(e.to_string()),
            other => StorageError::query("driver", other.to_string()),
        }
    }
}
