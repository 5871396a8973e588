//! Multi-camera manager
//!
//! Owns one `DetectorPipeline` per running camera, enforces the capacity
//! ceiling and reconciles running cameras against the registry.

use crate::config::ManagerConfig;
use crate::pipeline::{DetectorPipeline, PipelineDeps, PipelineEvent, PipelineState};
use crate::MonitorError;
use camera_capture::{CameraSource, VideoFrame};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use storage::{CameraId, CameraRegistry, CameraStatus};
use tracing::{debug, error, info, warn};

/// Running camera as reported to API clients
#[derive(Debug, Clone, Serialize)]
pub struct CameraSummary {
    pub camera_id: CameraId,
    pub source: String,
    pub state: &'static str,
}

pub struct CameraManager {
    deps: PipelineDeps,
    registry: Arc<dyn CameraRegistry>,
    config: ManagerConfig,
    pipelines: Mutex<HashMap<CameraId, Arc<DetectorPipeline>>>,
}

impl CameraManager {
    pub fn new(deps: PipelineDeps, registry: Arc<dyn CameraRegistry>, config: ManagerConfig) -> Self {
        info!(max_cameras = config.max_cameras, "Camera manager initialized");
        Self {
            deps,
            registry,
            config,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CameraId, Arc<DetectorPipeline>>> {
        self.pipelines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a pipeline for `camera_id`.
    ///
    /// Returns false when the camera is already running, the manager is at
    /// capacity, or the pipeline could not be started.
    pub fn add_camera(&self, camera_id: CameraId, src: &str) -> bool {
        match self.try_add(camera_id, src) {
            Ok(()) => true,
            Err(e @ (MonitorError::AlreadyRunning(_) | MonitorError::CapacityReached(_))) => {
                warn!(camera_id, "Camera not added: {}", e);
                false
            }
            Err(e) => {
                error!(camera_id, "Camera not added: {}", e);
                false
            }
        }
    }

    fn try_add(&self, camera_id: CameraId, src: &str) -> Result<(), MonitorError> {
        let mut pipelines = self.lock();
        if pipelines.contains_key(&camera_id) {
            return Err(MonitorError::AlreadyRunning(camera_id));
        }
        if pipelines.len() >= self.config.max_cameras {
            return Err(MonitorError::CapacityReached(self.config.max_cameras));
        }

        let source = CameraSource::parse(src);
        let pipeline = DetectorPipeline::start(camera_id, source, &self.deps)?;
        pipelines.insert(camera_id, Arc::new(pipeline));
        metrics::gauge!("active_cameras").set(pipelines.len() as f64);
        info!(camera_id, src, running = pipelines.len(), "Camera added");
        Ok(())
    }

    /// Stop and join a pipeline; false for an unknown camera
    pub async fn remove_camera(&self, camera_id: CameraId) -> bool {
        let removed = {
            let mut pipelines = self.lock();
            let removed = pipelines.remove(&camera_id);
            metrics::gauge!("active_cameras").set(pipelines.len() as f64);
            removed
        };
        let Some(pipeline) = removed else {
            debug!(camera_id, "Remove requested for unknown camera");
            return false;
        };

        pipeline.shutdown(self.config.join_timeout()).await;
        info!(camera_id, "Camera removed");
        true
    }

    /// Latest annotated frame for a running camera
    pub fn get_frame(&self, camera_id: CameraId) -> Option<Arc<VideoFrame>> {
        let pipeline = self.lock().get(&camera_id).cloned()?;
        pipeline.get_frame()
    }

    /// Remove pipelines whose camera is no longer Active in the registry.
    ///
    /// Registry lookup errors leave the pipeline running. Returns the number
    /// of cameras removed.
    pub async fn cleanup_inactive(&self) -> usize {
        let mut removed = 0;
        for camera_id in self.camera_ids() {
            let keep = match self.registry.get(camera_id).await {
                Ok(Some(camera)) => camera.status == CameraStatus::Active,
                Ok(None) => false,
                Err(e) => {
                    warn!(camera_id, "Registry lookup failed during cleanup: {}", e);
                    true
                }
            };
            if !keep && self.remove_camera(camera_id).await {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Removed inactive cameras");
        }
        removed
    }

    /// Stop and join every pipeline
    pub async fn stop_all(&self) {
        let drained: Vec<_> = {
            let mut pipelines = self.lock();
            let drained = pipelines.drain().collect();
            metrics::gauge!("active_cameras").set(0.0);
            drained
        };
        let timeout = self.config.join_timeout();
        for (_, pipeline) in &drained {
            pipeline.stop();
        }
        for (camera_id, pipeline) in drained {
            pipeline.shutdown(timeout).await;
            debug!(camera_id, "Pipeline joined");
        }
        info!("All cameras stopped");
    }

    /// Start pipelines for every Active camera in the registry
    pub async fn seed_from_registry(&self) -> Result<usize, MonitorError> {
        let cameras = self.registry.get_active().await?;
        let mut started = 0;
        for camera in cameras {
            if self.add_camera(camera.id, &camera.src) {
                started += 1;
            }
        }
        info!(started, "Cameras seeded from registry");
        Ok(started)
    }

    /// React to a pipeline report
    pub async fn handle_event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::SourceFailed(camera_id) => {
                warn!(camera_id, "Source failed, marking camera inactive");
                if let Err(e) = self.registry.set_status(camera_id, CameraStatus::Inactive).await {
                    warn!(camera_id, "Failed to update camera status: {}", e);
                }
                self.remove_camera(camera_id).await;
            }
        }
    }

    /// Running cameras ordered by id
    pub fn list(&self) -> Vec<CameraSummary> {
        let mut cameras: Vec<_> = self
            .lock()
            .values()
            .map(|p| CameraSummary {
                camera_id: p.camera_id(),
                source: p.source().to_string(),
                state: p.state().as_str(),
            })
            .collect();
        cameras.sort_by_key(|c| c.camera_id);
        cameras
    }

    pub fn state(&self, camera_id: CameraId) -> Option<PipelineState> {
        self.lock().get(&camera_id).map(|p| p.state())
    }

    pub fn contains(&self, camera_id: CameraId) -> bool {
        self.lock().contains_key(&camera_id)
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.config.max_cameras
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn camera_ids(&self) -> Vec<CameraId> {
        self.lock().keys().copied().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use alerting::{AlertEmitter, FsImageStore};
    use camera_capture::{CaptureConfig, MockBackend};
    use face_locator::{FaceBox, FaceError, FaceLocator};
    use inference_engine::{EmotionLabel, MockClassifier};
    use std::time::Duration;
    use storage::{CameraRecord, MemoryRepository};
    use tokio::sync::mpsc;

    struct NoFaces;

    impl FaceLocator for NoFaces {
        fn locate(&self, _frame: &VideoFrame, _threshold: f32) -> Result<Vec<FaceBox>, FaceError> {
            Ok(Vec::new())
        }
    }

    pub(crate) fn camera(id: CameraId, status: CameraStatus) -> CameraRecord {
        CameraRecord {
            id,
            label: format!("Camera {}", id),
            src: id.to_string(),
            status,
        }
    }

    pub(crate) async fn manager(
        dir: &std::path::Path,
        repo: Arc<MemoryRepository>,
        max_cameras: usize,
    ) -> (CameraManager, mpsc::Receiver<PipelineEvent>) {
        let backend = MockBackend::new(VideoFrame::filled(64, 48, [90, 90, 90]));
        manager_with(dir, repo, max_cameras, backend).await
    }

    pub(crate) async fn manager_with(
        dir: &std::path::Path,
        repo: Arc<MemoryRepository>,
        max_cameras: usize,
        backend: MockBackend,
    ) -> (CameraManager, mpsc::Receiver<PipelineEvent>) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let images = FsImageStore::create(dir, "/static/alerts").await.unwrap();
        let deps = PipelineDeps {
            backend: Arc::new(backend),
            locator: Arc::new(NoFaces),
            classifier: Arc::new(MockClassifier::constant(EmotionLabel::Neutral, 0.9)),
            emitter: Arc::new(AlertEmitter::new(Arc::new(images), repo.clone(), repo.clone(), 90)),
            capture: CaptureConfig {
                grab_interval: Duration::from_millis(2),
                ..CaptureConfig::immediate()
            },
            pipeline: PipelineConfig::immediate(),
            events: events_tx,
        };
        let config = ManagerConfig {
            max_cameras,
            join_timeout_ms: 2000,
            ..Default::default()
        };
        (CameraManager::new(deps, repo, config), events_rx)
    }

    #[tokio::test]
    async fn test_capacity_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _events) = manager(dir.path(), Arc::new(MemoryRepository::new()), 10).await;

        for id in 1..=10 {
            assert!(manager.add_camera(id, &id.to_string()));
        }
        assert!(!manager.add_camera(11, "11"));
        assert_eq!(manager.count(), 10);

        assert!(manager.remove_camera(3).await);
        assert!(manager.add_camera(11, "11"));
        assert_eq!(manager.count(), 10);

        manager.stop_all().await;
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _events) = manager(dir.path(), Arc::new(MemoryRepository::new()), 4).await;

        assert!(manager.add_camera(1, "0"));
        assert!(!manager.add_camera(1, "0"));
        assert!(!manager.remove_camera(9).await);
        assert!(manager.remove_camera(1).await);
        assert!(!manager.remove_camera(1).await);
        assert!(manager.get_frame(1).is_none());
    }

    #[tokio::test]
    async fn test_frames_available_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _events) = manager(dir.path(), Arc::new(MemoryRepository::new()), 4).await;
        assert!(manager.add_camera(1, "0"));

        let mut waited = 0;
        while manager.get_frame(1).is_none() && waited < 200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        let frame = manager.get_frame(1).unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));

        let listed = manager.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].source, "/dev/video0");
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_cleanup_removes_inactive_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepository::with_cameras([
            camera(1, CameraStatus::Active),
            camera(2, CameraStatus::Inactive),
            camera(3, CameraStatus::Error),
        ]));
        let (manager, _events) = manager(dir.path(), repo, 10).await;
        for id in 1..=4 {
            assert!(manager.add_camera(id, "0"));
        }

        assert_eq!(manager.cleanup_inactive().await, 3);
        assert!(manager.contains(1));
        assert_eq!(manager.count(), 1);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_seed_starts_active_cameras() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepository::with_cameras([
            camera(1, CameraStatus::Active),
            camera(2, CameraStatus::Inactive),
            camera(3, CameraStatus::Active),
        ]));
        let (manager, _events) = manager(dir.path(), repo, 10).await;

        assert_eq!(manager.seed_from_registry().await.unwrap(), 2);
        assert!(manager.contains(1) && manager.contains(3));
        assert!(!manager.contains(2));
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_source_failure_marks_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepository::with_cameras([camera(5, CameraStatus::Active)]));
        let (manager, _events) = manager(dir.path(), repo.clone(), 10).await;
        assert!(manager.add_camera(5, "5"));

        manager.handle_event(PipelineEvent::SourceFailed(5)).await;
        assert!(!manager.contains(5));
        let record = repo.get(5).await.unwrap().unwrap();
        assert_eq!(record.status, CameraStatus::Inactive);
    }
}
