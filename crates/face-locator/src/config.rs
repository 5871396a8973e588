//! Face locator configuration

use crate::validator::ValidatorConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Face locator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// res10 SSD face detector (ONNX)
    pub model_path: PathBuf,

    /// Apply local contrast enhancement before detection
    pub enhance_contrast: bool,

    /// Histogram clip limit for contrast enhancement
    pub clahe_clip_limit: f32,

    /// Tile grid size (per axis) for contrast enhancement
    pub clahe_tiles: u32,

    /// Candidate validation thresholds
    pub validator: ValidatorConfig,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/res10_300x300_ssd.onnx"),
            enhance_contrast: true,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            validator: ValidatorConfig::default(),
        }
    }
}

impl LocatorConfig {
    /// Looser candidate validation
    pub fn lenient() -> Self {
        Self {
            validator: ValidatorConfig::lenient(),
            ..Default::default()
        }
    }
}
