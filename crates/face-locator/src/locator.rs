//! Detection plus validation

use crate::enhance::enhance_contrast;
use crate::{FaceBox, FaceDetector, FaceError, FaceValidator, LocatorConfig, SsdFaceDetector};
use camera_capture::VideoFrame;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

/// Finds validated faces in a frame
pub trait FaceLocator: Send + Sync {
    fn locate(&self, frame: &VideoFrame, confidence_threshold: f32) -> Result<Vec<FaceBox>, FaceError>;
}

/// Runs a detector on the contrast-enhanced frame, then validates each
/// candidate against the original frame
pub struct ValidatedLocator {
    detector: Arc<dyn FaceDetector>,
    validator: FaceValidator,
    config: LocatorConfig,
}

impl ValidatedLocator {
    pub fn new(detector: Arc<dyn FaceDetector>, config: LocatorConfig) -> Self {
        Self {
            detector,
            validator: FaceValidator::new(config.validator.clone()),
            config,
        }
    }

    /// Load the SSD model named in `config`
    pub fn from_config(config: LocatorConfig) -> Result<Self, FaceError> {
        let detector = SsdFaceDetector::load(&config.model_path)?;
        Ok(Self::new(Arc::new(detector), config))
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }
}

impl FaceLocator for ValidatedLocator {
    fn locate(&self, frame: &VideoFrame, confidence_threshold: f32) -> Result<Vec<FaceBox>, FaceError> {
        let input = if self.config.enhance_contrast {
            Cow::Owned(enhance_contrast(
                frame,
                self.config.clahe_tiles,
                self.config.clahe_clip_limit,
            ))
        } else {
            Cow::Borrowed(frame)
        };

        let candidates = self.detector.detect(&input, confidence_threshold)?;
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let gray = frame.to_grayscale();
        let mut faces = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.validator.validate(&gray, &candidate) {
                Ok(()) => faces.push(candidate),
                Err(reason) => {
                    metrics::counter!("faces_rejected_total").increment(1);
                    debug!(?candidate, "Rejected face candidate: {}", reason);
                }
            }
        }
        metrics::counter!("faces_located_total").increment(faces.len() as u64);
        Ok(faces)
    }
}
