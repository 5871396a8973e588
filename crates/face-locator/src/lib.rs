//! Face Locator
//!
//! Finds candidate faces in a frame:
//! - Local contrast enhancement on luma before detection
//! - res10 SSD face detector executed with ONNX Runtime
//! - Heuristic validation rejecting regions that are unlikely to be faces

pub mod config;
pub mod detector;
pub mod enhance;
pub mod locator;
pub mod validator;

pub use config::LocatorConfig;
pub use detector::{FaceDetector, MockFaceDetector, SsdFaceDetector};
pub use enhance::{enhance_contrast, equalize_local};
pub use locator::{FaceLocator, ValidatedLocator};
pub use validator::{FaceValidator, Rejection, ValidatorConfig};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Face locator error types
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),
}

/// Face rectangle in frame coordinates, clipped to the frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence (0.0 to 1.0)
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    /// Build from corner coordinates in pixels, clipping to a `width` x `height` frame.
    ///
    /// Returns `None` if nothing is left after clipping.
    pub fn from_corners(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        frame_width: u32,
        frame_height: u32,
        confidence: f32,
    ) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let max_x = (frame_width - 1) as f32;
        let max_y = (frame_height - 1) as f32;
        let x1 = x1.max(0.0).min(max_x) as u32;
        let y1 = y1.max(0.0).min(max_y) as u32;
        let x2 = x2.max(0.0).min(max_x) as u32;
        let y2 = y2.max(0.0).min(max_y) as u32;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self::new(x1, y1, x2 - x1, y2 - y1, confidence))
    }

    /// Width over height
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }

    pub fn area(&self) -> u32 {
        self.width * self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_from_corners_clips() {
        let face = FaceBox::from_corners(-20.0, 10.0, 700.0, 200.0, 640, 480, 0.9).unwrap();
        assert_eq!((face.x, face.y), (0, 10));
        assert_eq!(face.width, 639);
        assert_eq!(face.height, 190);
    }

    #[test]
    fn test_from_corners_degenerate() {
        assert!(FaceBox::from_corners(100.0, 100.0, 90.0, 150.0, 640, 480, 0.9).is_none());
        assert!(FaceBox::from_corners(700.0, 10.0, 800.0, 50.0, 640, 480, 0.9).is_none());
    }

    #[test]
    fn test_aspect_ratio() {
        let face = FaceBox::new(0, 0, 80, 100, 1.0);
        assert!((face.aspect_ratio() - 0.8).abs() < f32::EPSILON);
        assert_eq!(face.area(), 8000);
    }

    proptest! {
        #[test]
        fn prop_clipped_box_inside_frame(
            x1 in -500.0f32..1500.0,
            y1 in -500.0f32..1500.0,
            w in 0.0f32..800.0,
            h in 0.0f32..800.0,
        ) {
            if let Some(face) = FaceBox::from_corners(x1, y1, x1 + w, y1 + h, 640, 480, 0.9) {
                prop_assert!(face.width > 0 && face.height > 0);
                prop_assert!(face.x + face.width < 640);
                prop_assert!(face.y + face.height < 480);
            }
        }
    }
}
