//! Camera Routes

use axum::{extract::State, Json};
use monitor::CameraSummary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{CameraId, CameraStatus};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CamerasResponse {
    pub data: Vec<CameraSummary>,
    pub count: usize,
    pub capacity: usize,
}

/// Running pipelines
pub async fn list_cameras(State(state): State<Arc<AppState>>) -> Json<CamerasResponse> {
    let data = state.manager.list();
    Json(CamerasResponse {
        count: data.len(),
        capacity: state.manager.capacity(),
        data,
    })
}

/// Status push payload; both fields are required
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub camera_id: Option<CameraId>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusUpdateResponse {
    pub message: String,
    pub running: bool,
}

/// Start or stop a camera in response to a registry status change
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<StatusUpdateResponse>> {
    let (Some(camera_id), Some(status)) = (update.camera_id, update.status) else {
        warn!("Status update missing camera_id or status");
        return Err(ApiError::bad_request("camera_id and status are required"));
    };
    info!(camera_id, status = %status, "Camera status update received");

    match status.parse::<CameraStatus>() {
        Ok(CameraStatus::Active) => {
            let camera = state
                .registry
                .get(camera_id)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("camera {}", camera_id)))?;
            if !state.manager.add_camera(camera.id, &camera.src) && !state.manager.contains(camera.id) {
                return Err(ApiError::Conflict(format!(
                    "camera {} could not be started (capacity {})",
                    camera.id,
                    state.manager.capacity()
                )));
            }
        }
        Ok(CameraStatus::Inactive) => {
            state.manager.remove_camera(camera_id).await;
        }
        _ => {
            warn!(camera_id, status = %status, "Invalid status value");
            return Err(ApiError::bad_request(format!("invalid status '{}'", status)));
        }
    }

    Ok(Json(StatusUpdateResponse {
        message: format!("Status updated to {}", status),
        running: state.manager.contains(camera_id),
    }))
}
