use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::host::PlayerView;
use crate::user::StatValues;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub uuid: Uuid,
    pub value: i32,
}

/// Top of one statistic, best first.
#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub statistic: String,
    pub display_name: String,
    pub total: usize,
    pub entries: Vec<RankedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlayerNameResponse {
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlayerResponse {
    pub uuid: Uuid,
    pub name: String,
    pub loaded: bool,
    pub stats: StatValues,
}

impl From<PlayerView> for PlayerResponse {
    fn from(view: PlayerView) -> Self {
        Self {
            uuid: view.uuid,
            name: view.name,
            loaded: view.loaded,
            stats: view.stats,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddStatRequest {
    pub delta: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatResponse {
    pub statistic: String,
    pub value: i32,
}
