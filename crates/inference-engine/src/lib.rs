//! Emotion Inference Engine
//!
//! Classifies cropped face images into one of seven emotion labels. The ONNX
//! model runs on tract; a scripted mock stands in for it in tests.

mod emotion;
mod engine;

pub use emotion::{EmotionLabel, EmotionObservation, NEUTRAL_FALLBACK};
pub use engine::{ClassifierConfig, EmotionClassifier, MockClassifier, OnnxEmotionClassifier};

use thiserror::Error;

/// Errors during inference
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model load failed: {0}")]
    ModelLoadError(String),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Invalid input shape: expected {expected}, got {actual}")]
    InvalidInputShape { expected: String, actual: String },
    #[error("Unknown emotion label: {0}")]
    UnknownLabel(String),
}
