pub mod handlers;
pub mod types;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::database::UserDatabase;
use crate::host::{HostError, HostHandle};
use crate::statistic::StatisticRegistry;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub database: UserDatabase,
    pub host: HostHandle,
    pub registry: Arc<StatisticRegistry>,
}

impl AppState {
    pub fn new(database: UserDatabase, host: HostHandle) -> Self {
        Self {
            registry: Arc::clone(database.registry()),
            database,
            host,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/leaderboard/:statistic", get(handlers::get_leaderboard))
        .route("/players/:uuid", get(handlers::get_player))
        .route("/players/:uuid/name", get(handlers::get_player_name))
        .route("/players/:uuid/join", post(handlers::join))
        .route("/players/:uuid/leave", post(handlers::leave))
        .route("/players/:uuid/stats/:statistic", post(handlers::add_stat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<HostError> for ApiError {
    fn from(error: HostError) -> Self {
        match error {
            HostError::Stopped => ApiError::Internal("host loop has stopped".to_string()),
            HostError::User(user_error) => ApiError::NotFound(user_error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
