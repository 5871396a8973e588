//! Sustained-emotion smoothing
//!
//! A per-camera history of recent labels decides when a negative emotion is
//! sustained. An alert needs both a high share of negative labels and one
//! dominant negative label, and fires once per episode.

use inference_engine::{EmotionLabel, EmotionObservation};
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Smoothing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Observations below this confidence are recorded as neutral
    pub confidence_floor: f32,
    /// Minimum share of negative labels in the history
    pub sustain_threshold: f32,
    /// Minimum count of the dominant negative label
    pub mode_count_floor: usize,
    /// History length
    pub history_capacity: usize,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.75,
            sustain_threshold: 0.8,
            mode_count_floor: 6,
            history_capacity: 10,
        }
    }
}

impl SmootherConfig {
    /// Alert sooner on weaker evidence
    pub fn sensitive() -> Self {
        Self {
            confidence_floor: 0.6,
            sustain_threshold: 0.6,
            mode_count_floor: 4,
            ..Default::default()
        }
    }
}

/// Outcome of recording one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingDecision {
    /// Negative share below threshold; alert state cleared
    Calm,
    /// Negative share high but no label dominant enough
    Building,
    /// Sustained label already alerted for this episode
    Suppressed(EmotionLabel),
    /// New sustained label; emit an alert
    Alert(EmotionLabel),
}

/// Per-camera history and alert state
#[derive(Debug, Clone)]
pub struct EmotionSmoother {
    config: SmootherConfig,
    history: RingBuffer<EmotionLabel>,
    last_alerted: Option<EmotionLabel>,
}

impl EmotionSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            history: RingBuffer::new(config.history_capacity),
            config,
            last_alerted: None,
        }
    }

    /// Gate, record and evaluate one observation
    pub fn observe(&mut self, observation: EmotionObservation) -> SmoothingDecision {
        let gated = observation.gated(self.config.confidence_floor);
        if gated.label != observation.label {
            debug!(
                raw = observation.label.as_str(),
                confidence = observation.confidence,
                "Low confidence observation recorded as neutral"
            );
        }
        self.history.push(gated.label);
        self.evaluate()
    }

    fn evaluate(&mut self) -> SmoothingDecision {
        if self.negative_ratio() < self.config.sustain_threshold {
            self.last_alerted = None;
            return SmoothingDecision::Calm;
        }

        let Some((label, count)) = self.dominant_negative() else {
            return SmoothingDecision::Building;
        };
        if count < self.config.mode_count_floor {
            return SmoothingDecision::Building;
        }
        if self.last_alerted == Some(label) {
            return SmoothingDecision::Suppressed(label);
        }

        info!(
            emotion = label.as_str(),
            count,
            ratio = self.negative_ratio(),
            "Sustained negative emotion detected"
        );
        self.last_alerted = Some(label);
        SmoothingDecision::Alert(label)
    }

    /// Share of negative labels in the current history
    pub fn negative_ratio(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        let negatives = self.history.iter().filter(|l| l.is_negative()).count();
        negatives as f32 / self.history.len() as f32
    }

    /// Most frequent negative label; ties go to the most recently seen
    pub fn dominant_negative(&self) -> Option<(EmotionLabel, usize)> {
        let mut counts: HashMap<EmotionLabel, (usize, usize)> = HashMap::new();
        for (position, label) in self.history.iter().enumerate() {
            if label.is_negative() {
                let entry = counts.entry(*label).or_insert((0, position));
                entry.0 += 1;
                entry.1 = position;
            }
        }
        counts
            .into_iter()
            .max_by_key(|(_, (count, last_seen))| (*count, *last_seen))
            .map(|(label, (count, _))| (label, count))
    }

    pub fn last_alerted(&self) -> Option<EmotionLabel> {
        self.last_alerted
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Labels oldest to newest
    pub fn history(&self) -> Vec<EmotionLabel> {
        self.history.to_vec()
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }
}

impl Default for EmotionSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obs(label: EmotionLabel, confidence: f32) -> EmotionObservation {
        EmotionObservation::new(label, confidence)
    }

    fn alerts(decisions: &[SmoothingDecision]) -> Vec<EmotionLabel> {
        decisions
            .iter()
            .filter_map(|d| match d {
                SmoothingDecision::Alert(label) => Some(*label),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_sustained_fear_alerts_once() {
        let mut smoother = EmotionSmoother::default();
        let decisions: Vec<_> = (0..10)
            .map(|_| smoother.observe(obs(EmotionLabel::Fear, 0.9)))
            .collect();
        assert_eq!(alerts(&decisions), vec![EmotionLabel::Fear]);
        // the 6th observation reaches the mode floor
        assert_eq!(decisions[5], SmoothingDecision::Alert(EmotionLabel::Fear));
        assert_eq!(smoother.history_len(), 10);
    }

    #[test]
    fn test_long_episode_does_not_realert() {
        let mut smoother = EmotionSmoother::default();
        let decisions: Vec<_> = (0..50)
            .map(|_| smoother.observe(obs(EmotionLabel::Sadness, 0.95)))
            .collect();
        assert_eq!(alerts(&decisions).len(), 1);
        assert_eq!(
            decisions.last(),
            Some(&SmoothingDecision::Suppressed(EmotionLabel::Sadness))
        );
    }

    #[test]
    fn test_alternating_negatives_never_alert() {
        let mut smoother = EmotionSmoother::default();
        let decisions: Vec<_> = (0..10)
            .map(|i| {
                let label = if i % 2 == 0 { EmotionLabel::Fear } else { EmotionLabel::Anger };
                smoother.observe(obs(label, 0.9))
            })
            .collect();
        assert!(alerts(&decisions).is_empty());
        assert!((smoother.negative_ratio() - 1.0).abs() < f32::EPSILON);
        assert_eq!(decisions[9], SmoothingDecision::Building);
    }

    #[test]
    fn test_low_confidence_fear_is_neutral() {
        let mut smoother = EmotionSmoother::default();
        let decisions: Vec<_> = (0..30)
            .map(|_| smoother.observe(obs(EmotionLabel::Fear, 0.6)))
            .collect();
        assert!(alerts(&decisions).is_empty());
        assert!(smoother.history().iter().all(|l| *l == EmotionLabel::Neutral));
    }

    #[test]
    fn test_calm_resets_and_allows_new_episode() {
        let mut smoother = EmotionSmoother::default();
        for _ in 0..10 {
            smoother.observe(obs(EmotionLabel::Anger, 0.9));
        }
        assert_eq!(smoother.last_alerted(), Some(EmotionLabel::Anger));

        for _ in 0..10 {
            smoother.observe(obs(EmotionLabel::Neutral, 0.9));
        }
        assert_eq!(smoother.negative_ratio(), 0.0);
        assert_eq!(smoother.last_alerted(), None);

        let decisions: Vec<_> = (0..10)
            .map(|_| smoother.observe(obs(EmotionLabel::Anger, 0.9)))
            .collect();
        assert_eq!(alerts(&decisions), vec![EmotionLabel::Anger]);
    }

    #[test]
    fn test_new_dominant_label_alerts_again() {
        let mut smoother = EmotionSmoother::default();
        for _ in 0..10 {
            smoother.observe(obs(EmotionLabel::Fear, 0.9));
        }
        // history drifts from fear to disgust without ever calming down
        let decisions: Vec<_> = (0..10)
            .map(|_| smoother.observe(obs(EmotionLabel::Disgust, 0.9)))
            .collect();
        assert_eq!(alerts(&decisions), vec![EmotionLabel::Disgust]);
    }

    #[test]
    fn test_tie_prefers_most_recent() {
        let mut smoother = EmotionSmoother::new(SmootherConfig {
            mode_count_floor: 2,
            ..Default::default()
        });
        smoother.observe(obs(EmotionLabel::Fear, 0.9));
        smoother.observe(obs(EmotionLabel::Anger, 0.9));
        smoother.observe(obs(EmotionLabel::Fear, 0.9));
        smoother.observe(obs(EmotionLabel::Anger, 0.9));
        assert_eq!(smoother.dominant_negative(), Some((EmotionLabel::Anger, 2)));
    }

    proptest! {
        #[test]
        fn prop_history_bounded(labels in proptest::collection::vec(0usize..7, 0..100)) {
            let mut smoother = EmotionSmoother::default();
            for index in labels {
                let label = EmotionLabel::from_index(index).unwrap();
                smoother.observe(obs(label, 0.9));
                prop_assert!(smoother.history_len() <= 10);
            }
        }
    }
}
