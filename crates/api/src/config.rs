//! Application configuration
//!
//! Layered from an optional TOML file and `EMOTION_MONITOR__*` environment
//! variables, e.g. `EMOTION_MONITOR__SERVER__PORT=9000` or
//! `EMOTION_MONITOR__PIPELINE__SMOOTHING__MODE_COUNT_FLOOR=4`.

use crate::rate_limit::RateLimitConfig;
use alerting::AlertConfig;
use camera_capture::CaptureConfig;
use config::{Config, ConfigError, Environment, File};
use face_locator::LocatorConfig;
use inference_engine::ClassifierConfig;
use monitor::{ManagerConfig, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "EMOTION_MONITOR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub models: ModelsConfig,
    pub capture: CaptureSettings,
    pub pipeline: PipelineConfig,
    pub manager: ManagerConfig,
    pub alerts: AlertConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load `path` (optional, any format the `config` crate knows) and
    /// environment overrides on top of the defaults
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JPEG quality of live feed frames
    pub stream_jpeg_quality: u8,
    /// Wait before polling again when no new frame is available (ms)
    pub stream_poll_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            stream_jpeg_quality: 80,
            stream_poll_ms: 50,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stream_poll(&self) -> Duration {
        Duration::from_millis(self.stream_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://emotion_monitor.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub face: LocatorConfig,
    pub emotion: ClassifierConfig,
}

/// Capture settings in config-friendly units
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub ffmpeg_path: PathBuf,
    pub network_timeout_ms: u64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub grab_interval_ms: u64,
    pub max_failures: u32,
    pub reconnect_backoff_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_retry_delay_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let defaults = CaptureConfig::default();
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            network_timeout_ms: 5000,
            width: defaults.width,
            height: defaults.height,
            fps: defaults.fps,
            grab_interval_ms: defaults.grab_interval.as_millis() as u64,
            max_failures: defaults.max_failures,
            reconnect_backoff_ms: defaults.reconnect_backoff.as_millis() as u64,
            reconnect_attempts: defaults.reconnect_attempts,
            reconnect_retry_delay_ms: defaults.reconnect_retry_delay.as_millis() as u64,
        }
    }
}

impl CaptureSettings {
    pub fn to_capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            width: self.width,
            height: self.height,
            fps: self.fps,
            grab_interval: Duration::from_millis(self.grab_interval_ms),
            max_failures: self.max_failures,
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            reconnect_attempts: self.reconnect_attempts,
            reconnect_retry_delay: Duration::from_millis(self.reconnect_retry_delay_ms),
        }
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
