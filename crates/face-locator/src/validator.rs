//! Heuristic face validation
//!
//! Cheap statistics over a candidate region that filter out detector false
//! positives: walls, flat surfaces, blown-out or pitch-dark patches.

use crate::FaceBox;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a candidate was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("region too small: {width}x{height}")]
    TooSmall { width: u32, height: u32 },

    #[error("aspect ratio {0:.2} out of range")]
    AspectRatio(f32),

    #[error("low contrast: std dev {0:.1}")]
    LowContrast(f32),

    #[error("low edge density: {0:.3}")]
    LowEdgeDensity(f32),

    #[error("brightness {0:.1} out of range")]
    Brightness(f32),

    #[error("region outside frame")]
    OutOfFrame,
}

/// Validation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Minimum width and height in pixels
    pub min_size: u32,
    /// Minimum width/height ratio
    pub min_aspect: f32,
    /// Maximum width/height ratio
    pub max_aspect: f32,
    /// Minimum grayscale standard deviation
    pub min_std_dev: f32,
    /// Minimum fraction of Canny edge pixels
    pub min_edge_density: f32,
    /// Mean brightness bounds
    pub min_brightness: f32,
    pub max_brightness: f32,
    /// Canny hysteresis thresholds
    pub canny_low: f32,
    pub canny_high: f32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_size: 50,
            min_aspect: 0.6,
            max_aspect: 1.6,
            min_std_dev: 18.0,
            min_edge_density: 0.04,
            min_brightness: 35.0,
            max_brightness: 220.0,
            canny_low: 50.0,
            canny_high: 150.0,
        }
    }
}

impl ValidatorConfig {
    /// Accept smaller and flatter regions
    pub fn lenient() -> Self {
        Self {
            min_size: 30,
            min_std_dev: 12.0,
            min_edge_density: 0.02,
            ..Default::default()
        }
    }
}

/// Candidate face validator
#[derive(Debug, Clone, Default)]
pub struct FaceValidator {
    config: ValidatorConfig,
}

impl FaceValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Check a candidate against the grayscale frame it came from
    pub fn validate(&self, gray: &GrayImage, face: &FaceBox) -> Result<(), Rejection> {
        let cfg = &self.config;

        if face.width < cfg.min_size || face.height < cfg.min_size {
            return Err(Rejection::TooSmall {
                width: face.width,
                height: face.height,
            });
        }

        let aspect = face.aspect_ratio();
        if aspect < cfg.min_aspect || aspect > cfg.max_aspect {
            return Err(Rejection::AspectRatio(aspect));
        }

        let (frame_w, frame_h) = gray.dimensions();
        if face.x >= frame_w || face.y >= frame_h {
            return Err(Rejection::OutOfFrame);
        }
        let w = face.width.min(frame_w - face.x);
        let h = face.height.min(frame_h - face.y);
        let region = image::imageops::crop_imm(gray, face.x, face.y, w, h).to_image();

        let (mean, std_dev) = mean_std(&region);
        if std_dev < cfg.min_std_dev {
            return Err(Rejection::LowContrast(std_dev));
        }

        let edges = imageproc::edges::canny(&region, cfg.canny_low, cfg.canny_high);
        let edge_pixels = edges.as_raw().iter().filter(|v| **v > 0).count();
        let density = edge_pixels as f32 / edges.as_raw().len().max(1) as f32;
        if density < cfg.min_edge_density {
            return Err(Rejection::LowEdgeDensity(density));
        }

        if mean < cfg.min_brightness || mean > cfg.max_brightness {
            return Err(Rejection::Brightness(mean));
        }

        Ok(())
    }
}

fn mean_std(region: &GrayImage) -> (f32, f32) {
    let pixels = region.as_raw();
    if pixels.is_empty() {
        return (0.0, 0.0);
    }
    let n = pixels.len() as f64;
    let mean = pixels.iter().map(|v| *v as f64).sum::<f64>() / n;
    let variance = pixels
        .iter()
        .map(|v| {
            let d = *v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean as f32, variance.sqrt() as f32)
}
