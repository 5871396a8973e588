//! Alert emission
//!
//! Saves the face crop as a JPEG and appends a detection log. Emission is
//! best effort: failures are reported to the caller, never retried.

use crate::AlertError;
use async_trait::async_trait;
use camera_capture::VideoFrame;
use chrono::{DateTime, Utc};
use inference_engine::EmotionLabel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{CameraId, CameraRegistry, DetectionLog, DetectionLogStore, NewDetectionLog};
use tracing::{info, warn};

/// Label recorded when the camera is missing from the registry
const UNKNOWN_CAMERA: &str = "Unknown";

/// Alert output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Directory alert images are written to
    pub alerts_dir: PathBuf,
    /// URL prefix stored in detection logs
    pub public_prefix: String,
    /// JPEG quality for face crops
    pub jpeg_quality: u8,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alerts_dir: PathBuf::from("static/alerts"),
            public_prefix: "/static/alerts".to_string(),
            jpeg_quality: 90,
        }
    }
}

/// Durable storage for alert images
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store `bytes` under `filename`, returning the public path
    async fn save(&self, filename: &str, bytes: Vec<u8>) -> Result<String, AlertError>;
}

/// Writes alert images into a local directory
pub struct FsImageStore {
    dir: PathBuf,
    public_prefix: String,
}

impl FsImageStore {
    /// Create the store, making sure the directory exists
    pub async fn create(dir: impl Into<PathBuf>, public_prefix: &str) -> Result<Self, AlertError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Alert images directory: {}", dir.display());
        Ok(Self {
            dir,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, filename: &str, bytes: Vec<u8>) -> Result<String, AlertError> {
        tokio::fs::write(self.dir.join(filename), bytes).await?;
        Ok(format!("{}/{}", self.public_prefix, filename))
    }
}

/// `alert_{label}_{YYYYMMDD_HHMMSS_mmm}_{8 hex}.jpg`
pub fn alert_filename(label: EmotionLabel, at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "alert_{}_{}_{}.jpg",
        label.as_str(),
        at.format("%Y%m%d_%H%M%S_%3f"),
        &suffix[..8]
    )
}

/// Persists alerts for every camera
pub struct AlertEmitter {
    images: Arc<dyn ImageStore>,
    registry: Arc<dyn CameraRegistry>,
    logs: Arc<dyn DetectionLogStore>,
    jpeg_quality: u8,
}

impl AlertEmitter {
    pub fn new(
        images: Arc<dyn ImageStore>,
        registry: Arc<dyn CameraRegistry>,
        logs: Arc<dyn DetectionLogStore>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            images,
            registry,
            logs,
            jpeg_quality,
        }
    }

    /// Save the face crop and record a detection log
    pub async fn emit(
        &self,
        camera_id: CameraId,
        face: &VideoFrame,
        label: EmotionLabel,
        confidence: f32,
    ) -> Result<DetectionLog, AlertError> {
        let result = self.persist(camera_id, face, label, confidence).await;
        match &result {
            Ok(log) => {
                metrics::counter!("alerts_emitted_total", "emotion" => label.as_str()).increment(1);
                info!(
                    camera_id,
                    emotion = label.as_str(),
                    confidence,
                    image = %log.image_path,
                    "Alert saved"
                );
            }
            Err(e) => {
                metrics::counter!("alert_failures_total").increment(1);
                warn!(camera_id, emotion = label.as_str(), "Alert emission failed: {}", e);
            }
        }
        result
    }

    async fn persist(
        &self,
        camera_id: CameraId,
        face: &VideoFrame,
        label: EmotionLabel,
        confidence: f32,
    ) -> Result<DetectionLog, AlertError> {
        let timestamp = Utc::now();
        let jpeg = face.encode_jpeg(self.jpeg_quality)?;
        let image_path = self
            .images
            .save(&alert_filename(label, timestamp), jpeg)
            .await?;

        let camera_label = match self.registry.get(camera_id).await {
            Ok(Some(camera)) => camera.label,
            Ok(None) => UNKNOWN_CAMERA.to_string(),
            Err(e) => {
                warn!(camera_id, "Camera lookup failed: {}", e);
                UNKNOWN_CAMERA.to_string()
            }
        };

        let log = NewDetectionLog {
            camera_id,
            camera_label,
            emotion: label.as_str().to_string(),
            confidence,
            image_path,
            timestamp,
        };
        let id = self.logs.save(log.clone()).await?;

        Ok(DetectionLog {
            id,
            camera_id: log.camera_id,
            camera_label: log.camera_label,
            emotion: log.emotion,
            confidence: log.confidence,
            image_path: log.image_path,
            timestamp: log.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use storage::{CameraRecord, CameraStatus, MemoryRepository};

    async fn setup(dir: &Path) -> (AlertEmitter, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::with_cameras([CameraRecord {
            id: 1,
            label: "Reception".to_string(),
            src: "0".to_string(),
            status: CameraStatus::Active,
        }]));
        let images = FsImageStore::create(dir, "/static/alerts/").await.unwrap();
        let emitter = AlertEmitter::new(Arc::new(images), repo.clone(), repo.clone(), 90);
        (emitter, repo)
    }

    #[test]
    fn test_filename_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let name = alert_filename(EmotionLabel::Fear, at);
        assert!(name.starts_with("alert_fear_20240309_140507_000_"));
        assert!(name.ends_with(".jpg"));
        assert_eq!(name.len(), "alert_fear_20240309_140507_000_".len() + 8 + 4);
    }

    #[test]
    fn test_same_instant_filenames_differ() {
        let at = Utc::now();
        assert_ne!(
            alert_filename(EmotionLabel::Anger, at),
            alert_filename(EmotionLabel::Anger, at)
        );
    }

    #[tokio::test]
    async fn test_emit_writes_image_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let (emitter, repo) = setup(dir.path()).await;
        let face = VideoFrame::filled(64, 64, [180, 140, 120]);

        let log = emitter.emit(1, &face, EmotionLabel::Anger, 0.91).await.unwrap();
        assert_eq!(log.camera_label, "Reception");
        assert_eq!(log.emotion, "anger");
        assert!(log.image_path.starts_with("/static/alerts/alert_anger_"));

        let filename = log.image_path.rsplit('/').next().unwrap();
        let bytes = std::fs::read(dir.path().join(filename)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(repo.log_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_camera_label() {
        let dir = tempfile::tempdir().unwrap();
        let (emitter, _repo) = setup(dir.path()).await;
        let face = VideoFrame::filled(32, 32, [90, 90, 90]);
        let log = emitter.emit(42, &face, EmotionLabel::Sadness, 0.8).await.unwrap();
        assert_eq!(log.camera_label, "Unknown");
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (emitter, repo) = setup(dir.path()).await;
        repo.set_fail_writes(true);
        let face = VideoFrame::filled(32, 32, [90, 90, 90]);
        let result = emitter.emit(1, &face, EmotionLabel::Disgust, 0.8).await;
        assert!(matches!(result, Err(AlertError::Storage(_))));
    }
}
