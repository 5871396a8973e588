//! Pipeline and manager configuration

use alerting::SmootherConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-camera pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum time between detection cycle starts (ms)
    pub detection_interval_ms: u64,

    /// Wait when no new frame is available (ms)
    pub idle_wait_ms: u64,

    /// Face detector confidence threshold
    pub face_confidence: f32,

    /// Consecutive no-face cycles before the locator is skipped
    pub no_face_threshold: u32,

    /// Extra skipped cycles before a forced retry
    pub skip_cooldown: u32,

    /// Sustained-emotion smoothing
    pub smoothing: SmootherConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detection_interval_ms: 200,
            idle_wait_ms: 10,
            face_confidence: 0.7,
            no_face_threshold: 5,
            skip_cooldown: 3,
            smoothing: SmootherConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// No cadence limit or idle wait, for tests
    pub fn immediate() -> Self {
        Self {
            detection_interval_ms: 0,
            idle_wait_ms: 1,
            ..Default::default()
        }
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms.max(1))
    }
}

/// Multi-camera manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum concurrently running cameras
    pub max_cameras: usize,

    /// Bound on joining a stopped pipeline (ms)
    pub join_timeout_ms: u64,

    /// Registry reconciliation period (s)
    pub reconcile_interval_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_cameras: 10,
            join_timeout_ms: 5000,
            reconcile_interval_secs: 30,
        }
    }
}

impl ManagerConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}
