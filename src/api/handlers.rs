use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::types::{
    AddStatRequest, JoinRequest, LeaderboardQuery, LeaderboardResponse, PlayerNameResponse,
    PlayerResponse, RankedEntry, StatResponse,
};
use super::{ApiError, AppState};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

/// GET /leaderboard/:statistic?limit=n
///
/// Highest values first. An unreachable store yields an empty board.
#[instrument(name = "get_leaderboard", skip(state))]
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path(statistic): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let statistic = state
        .registry
        .get(&statistic)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("unknown statistic '{statistic}'")))?;
    if !statistic.is_persistent() {
        return Err(ApiError::BadRequest(format!(
            "'{}' is not a stored statistic",
            statistic.name()
        )));
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let leaderboard = state.database.get_stats(&statistic).await;
    let entries = leaderboard
        .top(limit)
        .into_iter()
        .enumerate()
        .map(|(index, entry)| RankedEntry {
            rank: index + 1,
            uuid: entry.uuid,
            value: entry.value,
        })
        .collect();

    Ok(Json(LeaderboardResponse {
        statistic: statistic.name().to_string(),
        display_name: statistic.display_name().to_string(),
        total: leaderboard.len(),
        entries,
    }))
}

/// GET /players/:uuid/name
#[instrument(name = "get_player_name", skip(state))]
pub async fn get_player_name(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<PlayerNameResponse>, ApiError> {
    let name = state
        .database
        .get_player_name(uuid)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no stored player {uuid}")))?;

    Ok(Json(PlayerNameResponse { uuid, name }))
}

/// GET /players/:uuid
///
/// In-memory view of an online player.
#[instrument(name = "get_player", skip(state))]
pub async fn get_player(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<PlayerResponse>, ApiError> {
    let view = state
        .host
        .player(uuid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("player {uuid} is not online")))?;

    Ok(Json(view.into()))
}

/// POST /players/:uuid/join
#[instrument(name = "join", skip(state, request))]
pub async fn join(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<PlayerResponse>, ApiError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let view = state.host.join(uuid, name).await?;
    info!(%uuid, name, "Player joined over HTTP");
    Ok(Json(view.into()))
}

/// POST /players/:uuid/leave
#[instrument(name = "leave", skip(state))]
pub async fn leave(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.host.leave(uuid).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("player {uuid} is not online")))
    }
}

/// POST /players/:uuid/stats/:statistic
#[instrument(name = "add_stat", skip(state, request))]
pub async fn add_stat(
    State(state): State<AppState>,
    Path((uuid, statistic)): Path<(Uuid, String)>,
    Json(request): Json<AddStatRequest>,
) -> Result<Json<StatResponse>, ApiError> {
    let value = state.host.add_stat(uuid, &statistic, request.delta).await?;

    Ok(Json(StatResponse {
        statistic: statistic.trim().to_ascii_lowercase(),
        value,
    }))
}
