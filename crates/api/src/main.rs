//! Emotion Monitor - Main Entry Point

use alerting::{AlertEmitter, FsImageStore};
use anyhow::Context;
use api::config::AppConfig;
use api::{create_router, init_logging, AppState};
use camera_capture::FfmpegBackend;
use face_locator::ValidatedLocator;
use inference_engine::OnnxEmotionClassifier;
use metrics_exporter_prometheus::PrometheusBuilder;
use monitor::{spawn_reconciler, CameraManager, PipelineDeps};
use std::net::SocketAddr;
use std::sync::Arc;
use storage::SqliteRepository;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/default";
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path).context("failed to load configuration")?;
    init_logging(&config.logging);

    info!("=== Emotion Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let repo = Arc::new(
        SqliteRepository::connect(&config.database.url, config.database.max_connections)
            .await
            .context("failed to open database")?,
    );

    let locator = ValidatedLocator::from_config(config.models.face.clone())
        .context("failed to load face detector")?;
    let classifier = OnnxEmotionClassifier::load(&config.models.emotion)
        .context("failed to load emotion classifier")?;

    let images = FsImageStore::create(&config.alerts.alerts_dir, &config.alerts.public_prefix)
        .await
        .context("failed to create alerts directory")?;
    let emitter = AlertEmitter::new(
        Arc::new(images),
        repo.clone(),
        repo.clone(),
        config.alerts.jpeg_quality,
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let deps = PipelineDeps {
        backend: Arc::new(FfmpegBackend::new(
            &config.capture.ffmpeg_path,
            config.capture.network_timeout(),
        )),
        locator: Arc::new(locator),
        classifier: Arc::new(classifier),
        emitter: Arc::new(emitter),
        capture: config.capture.to_capture_config(),
        pipeline: config.pipeline.clone(),
        events: events_tx,
    };
    let manager = Arc::new(CameraManager::new(deps, repo.clone(), config.manager.clone()));

    match manager.seed_from_registry().await {
        Ok(started) => info!(started, "Initial cameras started"),
        Err(e) => warn!("Could not seed cameras from registry: {}", e),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = spawn_reconciler(
        manager.clone(),
        events_rx,
        config.manager.reconcile_interval(),
        shutdown_rx,
    );

    let state = Arc::new(
        AppState::new(manager.clone(), repo.clone(), repo.clone(), config.server.clone())
            .with_metrics(metrics),
    );
    let app = create_router(state, &config.rate_limit, &config.alerts);

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Starting API server on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    })
    .await
    .context("server error")?;

    shutdown_tx.send_replace(true);
    if let Err(e) = reconciler.await {
        warn!("Reconciler task failed: {}", e);
    }
    manager.stop_all().await;
    info!("Shutdown complete");

    Ok(())
}
