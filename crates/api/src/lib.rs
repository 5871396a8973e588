//! Emotion Monitor service
//!
//! HTTP surface over the camera manager: live MJPEG feeds, snapshots, the
//! camera status push endpoint, the alert feed and Prometheus metrics.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use storage::{CameraRegistry, DetectionLogStore};
use tower_governor::GovernorLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod error;
pub mod rate_limit;
mod routes;

use crate::config::{LoggingConfig, ServerConfig};
use crate::rate_limit::{create_governor_config, RateLimitConfig};
use alerting::AlertConfig;
use monitor::CameraManager;

/// Application state shared across handlers
pub struct AppState {
    pub manager: Arc<CameraManager>,
    pub registry: Arc<dyn CameraRegistry>,
    pub logs: Arc<dyn DetectionLogStore>,
    /// Prometheus render handle, absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub server: ServerConfig,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        manager: Arc<CameraManager>,
        registry: Arc<dyn CameraRegistry>,
        logs: Arc<dyn DetectionLogStore>,
        server: ServerConfig,
    ) -> Self {
        Self {
            manager,
            registry,
            logs,
            metrics: None,
            server,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub cameras: CameraHealth,
}

#[derive(Debug, Serialize)]
pub struct CameraHealth {
    pub running: usize,
    pub capacity: usize,
}

/// Create the application router
pub fn create_router(
    state: Arc<AppState>,
    rate_limit: &RateLimitConfig,
    alerts: &AlertConfig,
) -> Router {
    let status_route = Router::new().route(
        "/api/v1/cameras/status",
        post(routes::cameras::update_status),
    );
    let status_route = match create_governor_config(rate_limit) {
        Some(config) => status_route.layer(GovernorLayer { config }),
        None => {
            warn!("Rate limit disabled: invalid quota {:?}", rate_limit);
            status_route
        }
    };

    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/cameras", get(routes::cameras::list_cameras))
        .route(
            "/api/v1/cameras/:id/snapshot",
            get(routes::stream::snapshot),
        )
        .route("/api/v1/alerts", get(routes::alerts::get_alerts))
        .route("/stream/:id", get(routes::stream::mjpeg))
        .route("/metrics", get(metrics_handler))
        .merge(status_route)
        .nest_service(&alerts.public_prefix, ServeDir::new(&alerts.alerts_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        cameras: CameraHealth {
            running: state.manager.count(),
            capacity: state.manager.capacity(),
        },
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Initialize logging; `RUST_LOG` wins over the configured level
pub fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use alerting::{AlertEmitter, FsImageStore};
    use camera_capture::{CaptureConfig, MockBackend, VideoFrame};
    use face_locator::{FaceBox, FaceError, FaceLocator};
    use inference_engine::{EmotionLabel, MockClassifier};
    use monitor::{ManagerConfig, PipelineConfig, PipelineDeps};
    use std::time::Duration;
    use storage::MemoryRepository;

    struct NoFaces;

    impl FaceLocator for NoFaces {
        fn locate(&self, _frame: &VideoFrame, _threshold: f32) -> Result<Vec<FaceBox>, FaceError> {
            Ok(Vec::new())
        }
    }

    pub struct TestApp {
        pub router: Router,
        pub state: Arc<AppState>,
        pub repo: Arc<MemoryRepository>,
        _dir: tempfile::TempDir,
    }

    pub async fn app(repo: MemoryRepository) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(repo);
        let alerts = AlertConfig {
            alerts_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let images = FsImageStore::create(&alerts.alerts_dir, &alerts.public_prefix)
            .await
            .unwrap();
        let (events, _) = tokio::sync::mpsc::channel(8);
        let deps = PipelineDeps {
            backend: Arc::new(MockBackend::new(VideoFrame::filled(48, 32, [120, 60, 30]))),
            locator: Arc::new(NoFaces),
            classifier: Arc::new(MockClassifier::constant(EmotionLabel::Neutral, 0.9)),
            emitter: Arc::new(AlertEmitter::new(Arc::new(images), repo.clone(), repo.clone(), 90)),
            capture: CaptureConfig {
                grab_interval: Duration::from_millis(2),
                ..CaptureConfig::immediate()
            },
            pipeline: PipelineConfig::immediate(),
            events,
        };
        let manager = Arc::new(CameraManager::new(
            deps,
            repo.clone(),
            ManagerConfig {
                max_cameras: 2,
                join_timeout_ms: 2000,
                ..Default::default()
            },
        ));
        let server = ServerConfig {
            stream_poll_ms: 5,
            ..Default::default()
        };
        let state = Arc::new(AppState::new(manager, repo.clone(), repo.clone(), server));
        let router = create_router(state.clone(), &RateLimitConfig::default(), &alerts);
        TestApp {
            router,
            state,
            repo,
            _dir: dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::app;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use storage::MemoryRepository;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let app = app(MemoryRepository::new()).await;
        let response = app
            .router
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["cameras"]["running"], 0);
        assert_eq!(json["cameras"]["capacity"], 2);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let app = app(MemoryRepository::new()).await;
        let response = app
            .router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
