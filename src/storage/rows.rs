use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use super::LoadedStats;
use crate::leaderboard::LeaderboardEntry;
use crate::user::{StatSnapshot, StatValues};

/// One stored player. Statistics missing from `stats` read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stats: BTreeMap<String, i32>,
}

impl StoredRow {
    pub fn value(&self, column: &str) -> i32 {
        self.stats.get(column).copied().unwrap_or_default()
    }
}

/// Rows keyed by the raw identifier text, as a map-backed stand-in for a
/// database table.
///
/// Keys are kept as strings so a corrupt identifier survives a round trip
/// through the file format and can be skipped at read time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowTable {
    rows: BTreeMap<String, StoredRow>,
}

impl RowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, uuid: Uuid) -> Option<&StoredRow> {
        self.rows.get(&uuid.to_string())
    }

    /// Inserts a row under an arbitrary key, valid identifier or not.
    pub fn insert_raw(&mut self, key: impl Into<String>, row: StoredRow) {
        self.rows.insert(key.into(), row);
    }

    /// Refreshes the display name, then returns the stored values, creating
    /// a zeroed row for unseen identifiers.
    pub fn load(&mut self, uuid: Uuid, name: &str, columns: &[String]) -> LoadedStats {
        let key = uuid.to_string();
        let created = !self.rows.contains_key(&key);
        let row = self.rows.entry(key).or_default();
        row.name = name.to_string();

        let values: StatValues = columns
            .iter()
            .map(|column| (column.clone(), row.value(column)))
            .collect();

        LoadedStats { values, created }
    }

    pub fn set_statistic(&mut self, uuid: Uuid, name: &str, column: &str, value: i32) {
        let row = self.row_mut(uuid, name);
        row.stats.insert(column.to_string(), value);
    }

    pub fn set_all(&mut self, snapshot: &StatSnapshot, columns: &[String]) {
        let row = self.row_mut(snapshot.uuid, &snapshot.name);
        for column in columns {
            row.stats.insert(column.clone(), snapshot.value(column));
        }
    }

    /// The whole column ascending by value, identifier as tie-breaker.
    /// Rows whose key is not a valid identifier are logged and skipped.
    pub fn column(&self, column: &str) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .rows
            .iter()
            .filter_map(|(key, row)| match Uuid::parse_str(key) {
                Ok(uuid) => Some(LeaderboardEntry {
                    uuid,
                    value: row.value(column),
                }),
                Err(_) => {
                    warn!(identifier = %key, column, "Skipping row with malformed identifier");
                    None
                }
            })
            .collect();

        entries.sort_by(|a, b| a.value.cmp(&b.value).then_with(|| a.uuid.cmp(&b.uuid)));
        entries
    }

    pub fn name_of(&self, uuid: Uuid) -> Option<String> {
        self.get(uuid).map(|row| row.name.clone())
    }

    fn row_mut(&mut self, uuid: Uuid, name: &str) -> &mut StoredRow {
        self.rows
            .entry(uuid.to_string())
            .or_insert_with(|| StoredRow {
                name: name.to_string(),
                stats: BTreeMap::new(),
            })
    }
}
