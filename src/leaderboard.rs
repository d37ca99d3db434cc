use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub uuid: Uuid,
    pub value: i32,
}

/// A whole statistic column, ordered ascending by value.
///
/// Includes every stored player, online or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    statistic: String,
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn new(statistic: impl Into<String>, mut entries: Vec<LeaderboardEntry>) -> Self {
        // Stable, so backend tie-breaking survives.
        entries.sort_by_key(|entry| entry.value);
        Self {
            statistic: statistic.into(),
            entries,
        }
    }

    pub fn empty(statistic: impl Into<String>) -> Self {
        Self::new(statistic, Vec::new())
    }

    pub fn statistic(&self) -> &str {
        &self.statistic
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LeaderboardEntry> {
        self.entries.iter()
    }

    /// The `limit` highest entries, best first.
    pub fn top(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.entries.iter().rev().take(limit).copied().collect()
    }

    /// 1-based rank where the highest value is rank 1.
    pub fn rank_of(&self, uuid: Uuid) -> Option<usize> {
        self.entries
            .iter()
            .rev()
            .position(|entry| entry.uuid == uuid)
            .map(|index| index + 1)
    }

    pub fn value_of(&self, uuid: Uuid) -> Option<i32> {
        self.entries
            .iter()
            .find(|entry| entry.uuid == uuid)
            .map(|entry| entry.value)
    }
}
