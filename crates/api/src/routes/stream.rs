//! Live feed routes
//!
//! `multipart/x-mixed-replace` MJPEG built from the manager's latest
//! annotated frames. The stream ends when the camera stops running.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use futures_util::stream;
use std::convert::Infallible;
use std::sync::Arc;
use storage::CameraId;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Position of one client in a camera feed
struct FeedCursor {
    state: Arc<AppState>,
    camera_id: CameraId,
    last_sequence: Option<u64>,
}

fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

async fn next_part(mut cursor: FeedCursor) -> Option<(Result<Bytes, Infallible>, FeedCursor)> {
    let poll = cursor.state.server.stream_poll();
    let quality = cursor.state.server.stream_jpeg_quality;
    loop {
        if !cursor.state.manager.contains(cursor.camera_id) {
            info!(camera_id = cursor.camera_id, "Camera stopped, ending stream");
            return None;
        }

        if let Some(frame) = cursor.state.manager.get_frame(cursor.camera_id) {
            if cursor.last_sequence != Some(frame.sequence) {
                cursor.last_sequence = Some(frame.sequence);
                match frame.encode_jpeg(quality) {
                    Ok(jpeg) => return Some((Ok(multipart_part(&jpeg)), cursor)),
                    Err(e) => warn!(camera_id = cursor.camera_id, "Frame encoding failed: {}", e),
                }
            }
        }
        tokio::time::sleep(poll).await;
    }
}

/// `GET /stream/:id`
pub async fn mjpeg(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<CameraId>,
) -> ApiResult<Response> {
    if !state.manager.contains(camera_id) {
        return Err(ApiError::not_found(format!("camera {} is not running", camera_id)));
    }
    debug!(camera_id, "Stream client connected");

    let cursor = FeedCursor {
        state,
        camera_id,
        last_sequence: None,
    };
    let body = Body::from_stream(stream::unfold(cursor, next_part));
    Ok((
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// `GET /api/v1/cameras/:id/snapshot`
pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<CameraId>,
) -> ApiResult<Response> {
    let frame = state
        .manager
        .get_frame(camera_id)
        .ok_or_else(|| ApiError::not_found(format!("no frame for camera {}", camera_id)))?;
    let jpeg = frame
        .encode_jpeg(state.server.stream_jpeg_quality)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}
