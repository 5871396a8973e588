//! Emotion classifier implementations

use crate::{EmotionLabel, EmotionObservation, InferenceError};
use camera_capture::VideoFrame;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info};
use tract_onnx::prelude::*;

/// ImageNet channel means (RGB)
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB)
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Classifies a cropped face image.
///
/// Implementations are loaded once and shared across camera pipelines, so
/// `classify` must be callable concurrently.
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, face: &VideoFrame) -> Result<EmotionObservation, InferenceError>;
}

/// Classifier model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Path to the ONNX model
    pub model_path: PathBuf,
    /// Square input side expected by the model
    pub input_size: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/emotion_classifier.onnx"),
            input_size: 64,
        }
    }
}

type EmotionModel = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// tract-onnx emotion classifier: RGB `[1, 3, S, S]` in, 7 logits out
pub struct OnnxEmotionClassifier {
    model: EmotionModel,
    input_size: u32,
    model_path: PathBuf,
}

impl OnnxEmotionClassifier {
    /// Load and optimize the ONNX model
    pub fn load(config: &ClassifierConfig) -> Result<Self, InferenceError> {
        info!("Loading emotion classifier: {}", config.model_path.display());
        let size = config.input_size as usize;

        let model = tract_onnx::onnx()
            .model_for_path(&config.model_path)
            .and_then(|m| {
                m.with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), tvec![1, 3, size, size]),
                )
            })
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| {
                InferenceError::ModelLoadError(format!("{}: {}", config.model_path.display(), e))
            })?;

        info!("Emotion classifier loaded successfully");
        Ok(Self {
            model,
            input_size: config.input_size,
            model_path: config.model_path.clone(),
        })
    }

    /// Get model path
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Resize and normalize a face crop into an NCHW tensor
    fn preprocess(&self, face: &VideoFrame) -> Tensor {
        let size = self.input_size;
        let resized = if face.width == size && face.height == size {
            face.clone()
        } else {
            face.resize(size, size)
        };
        let side = size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let value = resized.data[(y * side + x) * 3 + c] as f32 / 255.0;
            (value - MEAN[c]) / STD[c]
        })
        .into()
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn classify(&self, face: &VideoFrame) -> Result<EmotionObservation, InferenceError> {
        if face.width == 0 || face.height == 0 {
            return Err(InferenceError::InvalidInputShape {
                expected: "non-empty face crop".to_string(),
                actual: format!("{}x{}", face.width, face.height),
            });
        }

        let start = Instant::now();
        let input = self.preprocess(face);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        let logits = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;
        let logits: Vec<f32> = logits.iter().copied().collect();
        if logits.len() != EmotionLabel::ALL.len() {
            return Err(InferenceError::InvalidInputShape {
                expected: format!("{} logits", EmotionLabel::ALL.len()),
                actual: format!("{} logits", logits.len()),
            });
        }

        let probs = softmax(&logits);
        let (index, confidence) = argmax(&probs);
        let label = EmotionLabel::from_index(index)
            .ok_or_else(|| InferenceError::InferenceFailed(format!("bad class index {}", index)))?;

        debug!(
            label = label.as_str(),
            confidence,
            latency_us = start.elapsed().as_micros() as u64,
            "Classified face"
        );
        Ok(EmotionObservation::new(label, confidence))
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|v| v / sum).collect()
}

fn argmax(values: &[f32]) -> (usize, f32) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
}

/// Scripted classifier for tests
///
/// Returns queued observations in order, then repeats the fallback.
pub struct MockClassifier {
    script: Mutex<VecDeque<EmotionObservation>>,
    fallback: Option<EmotionObservation>,
    calls: AtomicUsize,
}

impl MockClassifier {
    /// Always returns the same observation
    pub fn constant(label: EmotionLabel, confidence: f32) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(EmotionObservation::new(label, confidence)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns `script` in order, then neutral
    pub fn scripted(script: impl IntoIterator<Item = EmotionObservation>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Some(EmotionObservation::new(EmotionLabel::Neutral, 1.0)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails
    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of classify calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmotionClassifier for MockClassifier {
    fn classify(&self, _face: &VideoFrame) -> Result<EmotionObservation, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?
            .pop_front();
        next.or(self.fallback)
            .ok_or_else(|| InferenceError::InferenceFailed("mock classifier failure".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, 0.5, -1.0, 0.0, 2.5]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(argmax(&probs).0, 2);
    }

    #[test]
    fn test_mock_script_then_fallback() {
        let face = VideoFrame::filled(4, 4, [0, 0, 0]);
        let mock = MockClassifier::scripted([EmotionObservation::new(EmotionLabel::Anger, 0.9)]);
        assert_eq!(mock.classify(&face).unwrap().label, EmotionLabel::Anger);
        assert_eq!(mock.classify(&face).unwrap().label, EmotionLabel::Neutral);
        assert_eq!(mock.calls(), 2);
    }

    #[test]
    fn test_mock_failing() {
        let face = VideoFrame::filled(4, 4, [0, 0, 0]);
        let mock = MockClassifier::failing();
        assert!(mock.classify(&face).is_err());
    }

    #[test]
    fn test_missing_model_fails_to_load() {
        let config = ClassifierConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            ..Default::default()
        };
        assert!(matches!(
            OnnxEmotionClassifier::load(&config),
            Err(InferenceError::ModelLoadError(_))
        ));
    }
}
