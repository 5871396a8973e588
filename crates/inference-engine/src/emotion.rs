//! Emotion labels and observations

use crate::InferenceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Emotion class predicted by the classifier.
///
/// Declaration order matches the model's output index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Happiness,
    Surprise,
    Sadness,
    Anger,
    Disgust,
    Fear,
    Neutral,
}

impl EmotionLabel {
    /// All labels in model output order
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Happiness,
        EmotionLabel::Surprise,
        EmotionLabel::Sadness,
        EmotionLabel::Anger,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Neutral,
    ];

    /// Label for a model output index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Happiness => "happiness",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Sadness => "sadness",
            EmotionLabel::Anger => "anger",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Neutral => "neutral",
        }
    }

    /// Whether the label counts toward a sustained-negative alert
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            EmotionLabel::Sadness | EmotionLabel::Anger | EmotionLabel::Disgust | EmotionLabel::Fear
        )
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|label| label.as_str() == lower)
            .copied()
            .ok_or_else(|| InferenceError::UnknownLabel(s.to_string()))
    }
}

/// One classification of one face
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionObservation {
    pub label: EmotionLabel,
    /// Softmax probability of `label` (0.0 to 1.0)
    pub confidence: f32,
}

/// Observation used in place of low-confidence predictions
pub const NEUTRAL_FALLBACK: EmotionLabel = EmotionLabel::Neutral;

impl EmotionObservation {
    pub fn new(label: EmotionLabel, confidence: f32) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Replace the label with neutral when confidence is below `floor`
    pub fn gated(self, floor: f32) -> Self {
        if self.confidence < floor {
            Self {
                label: NEUTRAL_FALLBACK,
                ..self
            }
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_order() {
        assert_eq!(EmotionLabel::from_index(0), Some(EmotionLabel::Happiness));
        assert_eq!(EmotionLabel::from_index(6), Some(EmotionLabel::Neutral));
        assert_eq!(EmotionLabel::from_index(7), None);
    }

    #[test]
    fn test_negative_set() {
        let negative: Vec<_> = EmotionLabel::ALL.iter().filter(|l| l.is_negative()).collect();
        assert_eq!(negative.len(), 4);
        assert!(!EmotionLabel::Surprise.is_negative());
        assert!(!EmotionLabel::Neutral.is_negative());
    }

    #[test]
    fn test_parse_label() {
        assert_eq!("Anger".parse::<EmotionLabel>().unwrap(), EmotionLabel::Anger);
        assert!("contempt".parse::<EmotionLabel>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&EmotionLabel::Fear).unwrap();
        assert_eq!(json, "\"fear\"");
    }

    #[test]
    fn test_gating_below_floor() {
        let obs = EmotionObservation::new(EmotionLabel::Anger, 0.60).gated(0.75);
        assert_eq!(obs.label, EmotionLabel::Neutral);
        assert!((obs.confidence - 0.60).abs() < f32::EPSILON);

        let kept = EmotionObservation::new(EmotionLabel::Anger, 0.75).gated(0.75);
        assert_eq!(kept.label, EmotionLabel::Anger);
    }
}
