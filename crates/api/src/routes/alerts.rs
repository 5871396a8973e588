//! Alert Routes

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::DetectionLog;

use crate::error::ApiResult;
use crate::AppState;

const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub data: Vec<DetectionLog>,
    pub count: usize,
}

/// Most recent detection logs, newest first
pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertQuery>,
) -> ApiResult<Json<AlertResponse>> {
    let limit = params.limit.min(MAX_LIMIT);
    let data = state.logs.recent(limit).await?;
    Ok(Json(AlertResponse {
        count: data.len(),
        data,
    }))
}
