//! Capture backend contracts

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{CameraError, CameraSource, CaptureConfig, VideoFrame};

/// Unblocks a stream from another thread (e.g. a read stuck on a dead socket)
pub trait StreamInterrupt: Send + Sync {
    fn interrupt(&self);
}

/// An open capture handle. Dropping it releases the device or stream.
pub trait CaptureStream: Send {
    /// Read the next decoded frame (blocking)
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError>;

    /// Handle that aborts a blocked `read_frame` from another thread
    fn interrupter(&self) -> Option<Arc<dyn StreamInterrupt>> {
        None
    }
}

/// Opens capture streams for camera sources
pub trait CaptureBackend: Send + Sync {
    fn open(
        &self,
        source: &CameraSource,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureStream>, CameraError>;
}

/// Switches shared between a [`MockBackend`] and the test driving it
#[derive(Debug, Default)]
pub struct MockControl {
    /// Make every `read_frame` fail
    pub fail_reads: AtomicBool,
    /// Make every `open` fail
    pub fail_opens: AtomicBool,
    /// Number of `open` calls so far
    pub opens: AtomicUsize,
    /// Number of successful reads so far
    pub frames: AtomicU64,
}

impl MockControl {
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

/// In-process backend producing copies of a template frame
pub struct MockBackend {
    template: VideoFrame,
    control: Arc<MockControl>,
}

impl MockBackend {
    /// Create a mock backend for testing (no hardware or ffmpeg required)
    pub fn new(template: VideoFrame) -> Self {
        Self {
            template,
            control: Arc::new(MockControl::default()),
        }
    }

    pub fn control(&self) -> Arc<MockControl> {
        self.control.clone()
    }
}

impl CaptureBackend for MockBackend {
    fn open(
        &self,
        source: &CameraSource,
        _config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureStream>, CameraError> {
        self.control.opens.fetch_add(1, Ordering::SeqCst);
        if self.control.fail_opens.load(Ordering::SeqCst) {
            return Err(CameraError::Open(format!("mock refused {}", source)));
        }
        Ok(Box::new(MockStream {
            template: self.template.clone(),
            control: self.control.clone(),
        }))
    }
}

struct MockStream {
    template: VideoFrame,
    control: Arc<MockControl>,
}

impl CaptureStream for MockStream {
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if self.control.fail_reads.load(Ordering::SeqCst) {
            return Err(CameraError::Read("mock read failure".to_string()));
        }
        let sequence = self.control.frames.fetch_add(1, Ordering::SeqCst) + 1;
        let mut frame = self.template.clone();
        frame.sequence = sequence;
        Ok(frame)
    }
}
