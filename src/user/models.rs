use std::collections::HashMap;
use uuid::Uuid;

use crate::statistic::{normalize_name, StatisticRegistry, StatisticType};

/// Statistic name -> value.
pub type StatValues = HashMap<String, i32>;

/// Where a user's stored values stand for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Load queued; in-memory values are still defaults.
    Pending,
    Loaded,
    /// The last load failed with this error kind.
    Failed(&'static str),
    /// Load requeued after the store was unreachable. In-memory values are
    /// authoritative and saves queue behind the retried load.
    Recovering,
}

/// An online player and their in-memory statistics.
///
/// Owned and mutated exclusively by the authoritative loop. Storage workers
/// never see a `User`; they receive a [`StatSnapshot`] taken at submit time.
#[derive(Debug, Clone)]
pub struct User {
    uuid: Uuid,
    name: String,
    stats: StatValues,
    state: LoadState,
}

impl User {
    /// Creates a user with every registered statistic at its default.
    pub fn new(uuid: Uuid, name: impl Into<String>, registry: &StatisticRegistry) -> Self {
        let stats = registry
            .iter()
            .map(|s| (s.name().to_string(), s.default_value()))
            .collect();

        Self {
            uuid,
            name: name.into(),
            stats,
            state: LoadState::Pending,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether stored values have been applied for this session.
    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    pub fn load_state(&self) -> LoadState {
        self.state
    }

    /// Whether saves may be written without clobbering stored values.
    pub fn accepts_saves(&self) -> bool {
        matches!(self.state, LoadState::Loaded | LoadState::Recovering)
    }

    /// A load that failed only because the store was unreachable is worth
    /// retrying on the next save trigger.
    pub fn needs_recovery(&self) -> bool {
        self.state == LoadState::Failed("unavailable")
    }

    pub fn mark_load_failed(&mut self, kind: &'static str) {
        self.state = LoadState::Failed(kind);
    }

    pub fn mark_recovering(&mut self) {
        self.state = LoadState::Recovering;
    }

    /// Marks the row as present without touching in-memory values.
    pub fn mark_recovered(&mut self) {
        self.state = LoadState::Loaded;
    }

    pub fn stat(&self, statistic: &StatisticType) -> i32 {
        self.stats
            .get(statistic.name())
            .copied()
            .unwrap_or_else(|| statistic.default_value())
    }

    pub fn stat_by_name(&self, name: &str) -> Option<i32> {
        self.stats.get(&normalize_name(name)).copied()
    }

    pub fn set_stat(&mut self, statistic: &StatisticType, value: i32) {
        self.stats.insert(statistic.name().to_string(), value);
    }

    /// Adds `delta`, saturating at the `i32` bounds, and returns the new value.
    pub fn add_stat(&mut self, statistic: &StatisticType, delta: i32) -> i32 {
        let value = self.stat(statistic).saturating_add(delta);
        self.set_stat(statistic, value);
        value
    }

    /// Immutable copy of every persistent statistic, for handing to workers.
    pub fn snapshot(&self, registry: &StatisticRegistry) -> StatSnapshot {
        let values = registry
            .persistent()
            .map(|s| (s.name().to_string(), self.stat(s)))
            .collect();

        StatSnapshot {
            uuid: self.uuid,
            name: self.name.clone(),
            values,
        }
    }

    /// Applies values produced by a completed load and marks the user loaded.
    pub fn apply_loaded(&mut self, values: &StatValues) {
        for (name, value) in values {
            self.stats.insert(name.clone(), *value);
        }
        self.state = LoadState::Loaded;
    }
}

/// Point-in-time copy of a user's persistent statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatSnapshot {
    pub uuid: Uuid,
    pub name: String,
    pub values: StatValues,
}

impl StatSnapshot {
    pub fn value(&self, name: &str) -> i32 {
        self.values.get(name).copied().unwrap_or_default()
    }
}
