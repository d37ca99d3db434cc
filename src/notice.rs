use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::storage::StorageError;

/// Operator-facing report that persistence stopped working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedNotice {
    pub operation: String,
    pub kind: &'static str,
    pub code: Option<String>,
    pub detail: String,
}

impl DegradedNotice {
    pub fn from_error(operation: &str, error: &StorageError) -> Self {
        Self {
            operation: operation.to_string(),
            kind: error.kind(),
            code: error.code().map(str::to_string),
            detail: error.to_string(),
        }
    }
}

/// One-way channel for [`DegradedNotice`]s.
///
/// Every notice is logged at error level; subscribers (consoles, tests)
/// receive a copy if any are listening.
#[derive(Debug, Clone)]
pub struct NoticeBus {
    sender: broadcast::Sender<DegradedNotice>,
}

impl NoticeBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn raise(&self, notice: DegradedNotice) {
        error!(
            operation = %notice.operation,
            kind = notice.kind,
            code = ?notice.code,
            detail = %notice.detail,
            "Persistence degraded: player statistics will not be saved. \
             Check the storage configuration or switch the storage kind to file"
        );

        if self.sender.send(notice).is_err() {
            debug!("Degraded notice raised with no subscribers");
        }
    }

    pub fn raise_error(&self, operation: &str, error: &StorageError) {
        self.raise(DegradedNotice::from_error(operation, error));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DegradedNotice> {
        self.sender.subscribe()
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new()
    }
}
