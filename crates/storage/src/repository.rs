//! In-memory repository

use crate::{
    CameraId, CameraRecord, CameraRegistry, CameraStatus, DetectionLog, DetectionLogStore,
    NewDetectionLog, StorageError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Registry and log store held in memory
pub struct MemoryRepository {
    /// Cameras by id
    cameras: Mutex<BTreeMap<CameraId, CameraRecord>>,
    /// Detection logs, oldest first
    logs: Mutex<VecDeque<DetectionLog>>,
    /// Max detection logs kept
    max_logs: usize,
    /// Next detection log ID
    next_log_id: Mutex<i64>,
    /// Make every write fail (for exercising error paths)
    fail_writes: AtomicBool,
}

impl MemoryRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        info!("Creating in-memory repository");
        Self {
            cameras: Mutex::new(BTreeMap::new()),
            logs: Mutex::new(VecDeque::with_capacity(1000)),
            max_logs: 10_000,
            next_log_id: Mutex::new(1),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Create a repository pre-populated with cameras
    pub fn with_cameras(cameras: impl IntoIterator<Item = CameraRecord>) -> Self {
        let repo = Self::new();
        if let Ok(mut map) = repo.cameras.lock() {
            for camera in cameras {
                map.insert(camera.id, camera);
            }
        }
        repo
    }

    /// Insert or replace a camera
    pub fn upsert_camera(&self, camera: CameraRecord) -> Result<(), StorageError> {
        let mut cameras = self
            .cameras
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        cameras.insert(camera.id, camera);
        Ok(())
    }

    /// Delete a camera
    pub fn remove_camera(&self, id: CameraId) -> Result<bool, StorageError> {
        let mut cameras = self
            .cameras
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        Ok(cameras.remove(&id).is_some())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Get total detection log count
    pub fn log_count(&self) -> usize {
        self.logs.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        if let Ok(mut cameras) = self.cameras.lock() {
            cameras.clear();
        }
        if let Ok(mut logs) = self.logs.lock() {
            logs.clear();
        }
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::DatabaseError("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraRegistry for MemoryRepository {
    async fn get_active(&self) -> Result<Vec<CameraRecord>, StorageError> {
        let cameras = self
            .cameras
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        Ok(cameras
            .values()
            .filter(|c| c.status == CameraStatus::Active)
            .cloned()
            .collect())
    }

    async fn get(&self, id: CameraId) -> Result<Option<CameraRecord>, StorageError> {
        let cameras = self
            .cameras
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        Ok(cameras.get(&id).cloned())
    }

    async fn set_status(&self, id: CameraId, status: CameraStatus) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut cameras = self
            .cameras
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        let camera = cameras.get_mut(&id).ok_or(StorageError::NotFound)?;
        camera.status = status;
        debug!(camera_id = id, status = status.as_str(), "Camera status updated");
        Ok(())
    }
}

#[async_trait]
impl DetectionLogStore for MemoryRepository {
    async fn save(&self, log: NewDetectionLog) -> Result<i64, StorageError> {
        self.check_writable()?;
        let mut logs = self
            .logs
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;

        let mut next_id = self
            .next_log_id
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        let id = *next_id;
        *next_id += 1;

        // Enforce retention
        while logs.len() >= self.max_logs {
            logs.pop_front();
        }

        logs.push_back(DetectionLog::from_new(id, log));
        debug!("Inserted detection log with ID {}", id);
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DetectionLog>, StorageError> {
        let logs = self
            .logs
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        Ok(logs.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn camera(id: CameraId, status: CameraStatus) -> CameraRecord {
        CameraRecord {
            id,
            label: format!("Camera {}", id),
            src: format!("rtsp://10.0.0.{}/live", id),
            status,
        }
    }

    fn alert(camera_id: CameraId, emotion: &str) -> NewDetectionLog {
        NewDetectionLog {
            camera_id,
            camera_label: "Lobby".to_string(),
            emotion: emotion.to_string(),
            confidence: 0.9,
            image_path: "/static/alerts/a.jpg".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_active_filters_status() {
        let repo = MemoryRepository::with_cameras([
            camera(1, CameraStatus::Active),
            camera(2, CameraStatus::Inactive),
            camera(3, CameraStatus::Active),
        ]);
        let active: Vec<_> = repo.get_active().await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(active, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_set_status() {
        let repo = MemoryRepository::with_cameras([camera(1, CameraStatus::Active)]);
        repo.set_status(1, CameraStatus::Inactive).await.unwrap();
        assert_eq!(repo.get(1).await.unwrap().unwrap().status, CameraStatus::Inactive);
        assert!(matches!(
            repo.set_status(9, CameraStatus::Active).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_save_assigns_ids_and_recent_is_newest_first() {
        let repo = MemoryRepository::new();
        assert_eq!(repo.save(alert(1, "anger")).await.unwrap(), 1);
        assert_eq!(repo.save(alert(1, "fear")).await.unwrap(), 2);

        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].emotion, "fear");
        assert_eq!(repo.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let repo = MemoryRepository::new();
        repo.set_fail_writes(true);
        assert!(repo.save(alert(1, "anger")).await.is_err());
        assert_eq!(repo.log_count(), 0);
    }

    #[tokio::test]
    async fn test_removed_camera_is_missing() {
        let repo = MemoryRepository::with_cameras([camera(4, CameraStatus::Active)]);
        assert!(repo.remove_camera(4).unwrap());
        assert!(repo.get(4).await.unwrap().is_none());
    }
}
