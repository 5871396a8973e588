//! Emotion Monitor
//!
//! Per-camera detection pipelines and their lifecycle:
//! - Frame grabbing decoupled from a fixed detection cadence
//! - Face location, classification and sustained-emotion smoothing
//! - Alert emission and annotated output frames
//! - Multi-camera manager with a capacity ceiling and registry reconciliation

pub mod annotate;
pub mod config;
pub mod font;
pub mod gate;
pub mod manager;
pub mod pipeline;
pub mod reconcile;

pub use annotate::{annotate, FaceMark};
pub use config::{ManagerConfig, PipelineConfig};
pub use gate::FaceSkipGate;
pub use manager::{CameraManager, CameraSummary};
pub use pipeline::{
    CycleOutcome, CycleProcessor, DetectorPipeline, PendingAlert, PipelineDeps, PipelineEvent,
    PipelineState,
};
pub use reconcile::spawn_reconciler;

use camera_capture::CameraError;
use storage::{CameraId, StorageError};
use thiserror::Error;

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to start capture: {0}")]
    Capture(#[from] CameraError),

    #[error("Camera {0} is already running")]
    AlreadyRunning(CameraId),

    #[error("Camera capacity of {0} reached")]
    CapacityReached(usize),

    #[error("Registry error: {0}")]
    Storage(#[from] StorageError),
}
