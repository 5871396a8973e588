//! Alerting System
//!
//! Turns noisy per-frame emotion observations into deduplicated alerts:
//! - History smoothing with a ratio and dominant-label test
//! - One alert per sustained episode
//! - Face crop and detection log persistence

mod emitter;
mod smoother;

pub use emitter::{alert_filename, AlertConfig, AlertEmitter, FsImageStore, ImageStore};
pub use smoother::{EmotionSmoother, SmootherConfig, SmoothingDecision};

use thiserror::Error;

/// Alert emission errors
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Image write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image encoding failed: {0}")]
    Encode(#[from] camera_capture::CameraError),
    #[error("Detection log write failed: {0}")]
    Storage(#[from] storage::StorageError),
}
