//! Camera Capture Library for the Emotion Monitor
//!
//! Provides frame capture from heterogeneous camera sources.
//! Supports:
//! - Network streams (RTSP/RTMP/HTTP) decoded through ffmpeg
//! - Local video files (looped on end of stream via reconnect)
//! - V4L2 capture devices addressed by index
//!
//! The [`FrameGrabber`] owns one capture stream per camera and keeps only the
//! newest decoded frame.

pub mod backend;
pub mod ffmpeg;
pub mod frame;
pub mod grabber;

pub use backend::{CaptureBackend, CaptureStream, MockBackend, MockControl, StreamInterrupt};
pub use ffmpeg::FfmpegBackend;
pub use frame::VideoFrame;
pub use grabber::{FrameGrabber, FrameSlot, GrabLoop, GrabStep, GrabberState};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera source: {0}")]
    Open(String),

    #[error("Frame read failed: {0}")]
    Read(String),

    #[error("End of stream")]
    EndOfStream,

    #[error("Capture interrupted")]
    Interrupted,

    #[error("Image encoding failed: {0}")]
    Encode(String),

    #[error("Invalid frame geometry: {width}x{height} with {len} bytes")]
    Geometry { width: u32, height: u32, len: usize },
}

/// Where a camera's frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    /// Streaming transport (rtsp://, rtmp://, http://, ...)
    Network(String),
    /// Local video file
    File(PathBuf),
    /// Local capture device index (/dev/videoN)
    Device(u32),
}

const NETWORK_SCHEMES: [&str; 5] = ["rtsp://", "rtsps://", "rtmp://", "http://", "https://"];

impl CameraSource {
    /// Interpret a registry source locator
    pub fn parse(src: &str) -> Self {
        let trimmed = src.trim();
        if let Ok(index) = trimmed.parse::<u32>() {
            return CameraSource::Device(index);
        }
        let lower = trimmed.to_ascii_lowercase();
        if NETWORK_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
            CameraSource::Network(trimmed.to_string())
        } else {
            CameraSource::File(PathBuf::from(trimmed))
        }
    }

    /// Whether the source uses a streaming transport
    pub fn is_network(&self) -> bool {
        matches!(self, CameraSource::Network(_))
    }

    /// Whether the source is an RTSP stream
    pub fn is_rtsp(&self) -> bool {
        match self {
            CameraSource::Network(url) => {
                let lower = url.to_ascii_lowercase();
                lower.starts_with("rtsp://") || lower.starts_with("rtsps://")
            }
            _ => false,
        }
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::Network(url) => write!(f, "{}", url),
            CameraSource::File(path) => write!(f, "{}", path.display()),
            CameraSource::Device(index) => write!(f, "/dev/video{}", index),
        }
    }
}

/// Capture and reconnect configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Decoded frame width
    pub width: u32,
    /// Decoded frame height
    pub height: u32,
    /// Requested decode rate
    pub fps: u32,
    /// Pause between capture attempts
    pub grab_interval: Duration,
    /// Consecutive read failures before a reconnect
    pub max_failures: u32,
    /// Delay between releasing a failed stream and reopening it
    pub reconnect_backoff: Duration,
    /// Open attempts per reconnect
    pub reconnect_attempts: u32,
    /// Delay between failed open attempts
    pub reconnect_retry_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
            grab_interval: Duration::from_millis(30),
            max_failures: 20,
            reconnect_backoff: Duration::from_secs(2),
            reconnect_attempts: 3,
            reconnect_retry_delay: Duration::from_secs(2),
        }
    }
}

impl CaptureConfig {
    /// Config with no sleeps, for driving the grab loop in tests
    pub fn immediate() -> Self {
        Self {
            grab_interval: Duration::ZERO,
            reconnect_backoff: Duration::ZERO,
            reconnect_retry_delay: Duration::ZERO,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        assert_eq!(CameraSource::parse("0"), CameraSource::Device(0));
        assert_eq!(
            CameraSource::parse("rtsp://10.0.0.5:554/stream1"),
            CameraSource::Network("rtsp://10.0.0.5:554/stream1".to_string())
        );
        assert_eq!(
            CameraSource::parse("videos/lobby.mp4"),
            CameraSource::File(PathBuf::from("videos/lobby.mp4"))
        );
    }

    #[test]
    fn test_network_detection() {
        assert!(CameraSource::parse("RTSP://cam/live").is_rtsp());
        assert!(CameraSource::parse("http://cam/mjpg").is_network());
        assert!(!CameraSource::parse("http://cam/mjpg").is_rtsp());
        assert!(!CameraSource::parse("/tmp/a.mp4").is_network());
    }

    #[test]
    fn test_display_device() {
        assert_eq!(CameraSource::Device(2).to_string(), "/dev/video2");
    }
}
