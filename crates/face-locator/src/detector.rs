//! Face detection models

use crate::{FaceBox, FaceError};
use camera_capture::VideoFrame;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, error, info};

/// SSD input side
const SSD_INPUT: u32 = 300;
/// Per-channel means subtracted by the res10 SSD, in BGR order
const SSD_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];
/// Values per detection row: (image_id, label, confidence, x1, y1, x2, y2)
const ROW_LEN: usize = 7;

/// Produces candidate face boxes for a frame
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &VideoFrame, confidence_threshold: f32) -> Result<Vec<FaceBox>, FaceError>;
}

/// res10 300x300 SSD face detector on ONNX Runtime
pub struct SsdFaceDetector {
    session: Mutex<Session>,
    output_name: String,
}

impl SsdFaceDetector {
    /// Load the detector model
    pub fn load(path: &Path) -> Result<Self, FaceError> {
        info!("Loading face detection model from {}", path.display());
        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| {
                error!("Failed to load face model: {}", e);
                FaceError::ModelLoad(format!("{}: {}", path.display(), e))
            })?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| FaceError::ModelLoad("face model has no outputs".to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }

    /// Resize to 300x300 and build a BGR, mean-subtracted NCHW blob
    fn preprocess(frame: &VideoFrame) -> Array4<f32> {
        let resized = frame.resize(SSD_INPUT, SSD_INPUT);
        let side = SSD_INPUT as usize;
        Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            // blob channel c is BGR; frame data is RGB
            let rgb_index = 2 - c;
            resized.data[(y * side + x) * 3 + rgb_index] as f32 - SSD_MEAN_BGR[c]
        })
    }
}

impl FaceDetector for SsdFaceDetector {
    fn detect(&self, frame: &VideoFrame, confidence_threshold: f32) -> Result<Vec<FaceBox>, FaceError> {
        let input = Self::preprocess(frame);

        let session = self
            .session
            .lock()
            .map_err(|e| FaceError::Inference(format!("session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![input].map_err(|e| FaceError::Inference(e.to_string()))?)
            .map_err(|e| FaceError::Inference(e.to_string()))?;
        let detections = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| FaceError::Inference(e.to_string()))?;
        let rows: Vec<f32> = detections.iter().copied().collect();

        let faces = boxes_from_detections(&rows, frame.width, frame.height, confidence_threshold);
        debug!(
            candidates = rows.len() / ROW_LEN,
            accepted = faces.len(),
            "SSD detection complete"
        );
        Ok(faces)
    }
}

/// Decode flattened `[1, 1, N, 7]` SSD output into frame-space boxes
pub fn boxes_from_detections(
    rows: &[f32],
    frame_width: u32,
    frame_height: u32,
    confidence_threshold: f32,
) -> Vec<FaceBox> {
    let w = frame_width as f32;
    let h = frame_height as f32;
    rows.chunks_exact(ROW_LEN)
        .filter(|row| row[2] > confidence_threshold)
        .filter_map(|row| {
            FaceBox::from_corners(
                row[3] * w,
                row[4] * h,
                row[5] * w,
                row[6] * h,
                frame_width,
                frame_height,
                row[2],
            )
        })
        .collect()
}

/// Detector returning fixed boxes, for tests
pub struct MockFaceDetector {
    boxes: Vec<FaceBox>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockFaceDetector {
    /// Always return `boxes` (filtered by the threshold)
    pub fn new(boxes: Vec<FaceBox>) -> Self {
        Self {
            boxes,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Never finds a face
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Every call errors
    pub fn failing() -> Self {
        Self {
            boxes: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceDetector for MockFaceDetector {
    fn detect(&self, _frame: &VideoFrame, confidence_threshold: f32) -> Result<Vec<FaceBox>, FaceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FaceError::Inference("mock detector failure".to_string()));
        }
        Ok(self
            .boxes
            .iter()
            .filter(|b| b.confidence > confidence_threshold)
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_scales_and_filters() {
        let rows = [
            0.0, 1.0, 0.95, 0.25, 0.25, 0.5, 0.75, // kept
            0.0, 1.0, 0.30, 0.0, 0.0, 0.5, 0.5, // below threshold
        ];
        let faces = boxes_from_detections(&rows, 640, 480, 0.7);
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0], FaceBox::new(160, 120, 160, 240, 0.95));
    }

    #[test]
    fn test_decode_clips_to_frame() {
        let rows = [0.0, 1.0, 0.9, -0.1, 0.5, 1.2, 1.1];
        let faces = boxes_from_detections(&rows, 100, 100, 0.5);
        assert_eq!(faces[0].x, 0);
        assert_eq!(faces[0].x + faces[0].width, 99);
        assert_eq!(faces[0].y + faces[0].height, 99);
    }

    #[test]
    fn test_threshold_is_strict() {
        let rows = [0.0, 1.0, 0.7, 0.1, 0.1, 0.5, 0.5];
        assert!(boxes_from_detections(&rows, 100, 100, 0.7).is_empty());
    }

    #[test]
    fn test_preprocess_bgr_order() {
        let frame = VideoFrame::filled(10, 10, [200, 100, 50]);
        let blob = SsdFaceDetector::preprocess(&frame);
        assert_eq!(blob.shape(), &[1, 3, 300, 300]);
        assert!((blob[[0, 0, 5, 5]] - (50.0 - 104.0)).abs() < 1.0);
        assert!((blob[[0, 2, 5, 5]] - (200.0 - 123.0)).abs() < 1.0);
    }

    #[test]
    fn test_missing_model() {
        assert!(matches!(
            SsdFaceDetector::load(Path::new("/nonexistent/face.onnx")),
            Err(FaceError::ModelLoad(_))
        ));
    }
}
