//! Latest-frame grabber
//!
//! One dedicated OS thread per camera reads frames as fast as the source
//! allows and publishes only the newest one. Readers never touch the capture
//! device; they clone an `Arc` out of a single-slot `watch` channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backend::{CaptureBackend, CaptureStream, StreamInterrupt};
use crate::{CameraError, CameraSource, CaptureConfig, VideoFrame};

/// Slot holding the newest frame
pub type FrameSlot = watch::Receiver<Option<Arc<VideoFrame>>>;

type InterruptSlot = Arc<Mutex<Option<Arc<dyn StreamInterrupt>>>>;

/// Sleep granularity while waiting on backoffs, so stop() is honoured quickly
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Grabber lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabberState {
    /// Opening the source for the first time
    Starting,
    /// Frames are flowing
    Running,
    /// Stream released, reopening
    Reconnecting,
    /// Reconnect attempts exhausted
    Failed,
    /// Stopped on request
    Stopped,
}

impl GrabberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrabberState::Starting => "starting",
            GrabberState::Running => "running",
            GrabberState::Reconnecting => "reconnecting",
            GrabberState::Failed => "failed",
            GrabberState::Stopped => "stopped",
        }
    }

    /// Whether the grab loop has exited
    pub fn is_terminal(&self) -> bool {
        matches!(self, GrabberState::Failed | GrabberState::Stopped)
    }
}

/// Outcome of one grab loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStep {
    /// A frame was published
    Frame,
    /// A read failed; carries the consecutive failure count
    ReadFailed(u32),
    /// The stream was reopened
    Reconnected,
    /// Every reopen attempt failed
    ReconnectFailed,
    /// The running flag was cleared
    Stopped,
}

/// Capture loop state, driven by the grabber thread one step at a time
pub struct GrabLoop {
    camera_id: i64,
    source: CameraSource,
    config: CaptureConfig,
    backend: Arc<dyn CaptureBackend>,
    stream: Option<Box<dyn CaptureStream>>,
    failures: u32,
    grabbed: u64,
    reconnects: u64,
    started: Instant,
    running: Arc<AtomicBool>,
    interrupt: InterruptSlot,
    frame_tx: watch::Sender<Option<Arc<VideoFrame>>>,
    state_tx: watch::Sender<GrabberState>,
}

impl GrabLoop {
    pub fn new(
        camera_id: i64,
        source: CameraSource,
        backend: Arc<dyn CaptureBackend>,
        config: CaptureConfig,
    ) -> Self {
        let (frame_tx, _) = watch::channel(None);
        let (state_tx, _) = watch::channel(GrabberState::Starting);
        Self {
            camera_id,
            source,
            config,
            backend,
            stream: None,
            failures: 0,
            grabbed: 0,
            reconnects: 0,
            started: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            interrupt: Arc::new(Mutex::new(None)),
            frame_tx,
            state_tx,
        }
    }

    pub fn frame_receiver(&self) -> FrameSlot {
        self.frame_tx.subscribe()
    }

    pub fn state_receiver(&self) -> watch::Receiver<GrabberState> {
        self.state_tx.subscribe()
    }

    /// Consecutive read failures since the last good frame
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Number of reconnect procedures started
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Open the source for the first time.
    ///
    /// A source that cannot be opened goes straight into the reconnect
    /// procedure.
    pub fn start(&mut self) -> GrabStep {
        match self.backend.open(&self.source, &self.config) {
            Ok(stream) => {
                info!(camera_id = self.camera_id, source = %self.source, "Capture stream opened");
                self.install(stream);
                GrabStep::Reconnected
            }
            Err(e) => {
                warn!(camera_id = self.camera_id, "Initial open failed: {}", e);
                self.reconnect()
            }
        }
    }

    /// Run one iteration: read a frame, count failures, reconnect at threshold
    pub fn step(&mut self) -> GrabStep {
        if !self.running.load(Ordering::SeqCst) {
            return GrabStep::Stopped;
        }

        let result = match self.stream.as_mut() {
            Some(stream) => stream.read_frame(),
            None => Err(CameraError::Read("no open stream".to_string())),
        };

        match result {
            Ok(mut frame) => {
                self.failures = 0;
                self.grabbed += 1;
                // Re-sequence so frame order survives reconnects
                frame.sequence = self.grabbed;
                frame.timestamp_ns = self.started.elapsed().as_nanos() as u64;
                self.frame_tx.send_replace(Some(Arc::new(frame)));
                self.set_state(GrabberState::Running);
                metrics::counter!("capture_frames_total", "camera" => self.camera_id.to_string())
                    .increment(1);
                GrabStep::Frame
            }
            Err(_) if !self.running.load(Ordering::SeqCst) => GrabStep::Stopped,
            Err(e) => {
                self.failures += 1;
                metrics::counter!("capture_read_failures_total", "camera" => self.camera_id.to_string())
                    .increment(1);
                debug!(
                    camera_id = self.camera_id,
                    failures = self.failures,
                    "Frame grab failed: {}", e
                );
                if self.failures >= self.config.max_failures {
                    warn!(
                        camera_id = self.camera_id,
                        failures = self.failures,
                        "Max consecutive failures reached, reconnecting"
                    );
                    self.reconnect()
                } else {
                    GrabStep::ReadFailed(self.failures)
                }
            }
        }
    }

    /// Release the stream, back off, and reopen with bounded attempts
    fn reconnect(&mut self) -> GrabStep {
        self.set_state(GrabberState::Reconnecting);
        self.release();
        self.reconnects += 1;
        metrics::counter!("capture_reconnects_total", "camera" => self.camera_id.to_string())
            .increment(1);

        if !self.pause(self.config.reconnect_backoff) {
            return GrabStep::Stopped;
        }

        let attempts = self.config.reconnect_attempts.max(1);
        for attempt in 1..=attempts {
            if !self.running.load(Ordering::SeqCst) {
                return GrabStep::Stopped;
            }
            match self.backend.open(&self.source, &self.config) {
                Ok(stream) => {
                    info!(camera_id = self.camera_id, attempt, "Reconnected to {}", self.source);
                    self.install(stream);
                    return GrabStep::Reconnected;
                }
                Err(e) => {
                    warn!(camera_id = self.camera_id, attempt, "Reconnect attempt failed: {}", e);
                    if attempt < attempts && !self.pause(self.config.reconnect_retry_delay) {
                        return GrabStep::Stopped;
                    }
                }
            }
        }

        error!(
            camera_id = self.camera_id,
            attempts,
            "Failed to reconnect to {}", self.source
        );
        self.failures = 0;
        self.set_state(GrabberState::Failed);
        GrabStep::ReconnectFailed
    }

    fn install(&mut self, stream: Box<dyn CaptureStream>) {
        *self.interrupt.lock().unwrap_or_else(|e| e.into_inner()) = stream.interrupter();
        self.stream = Some(stream);
        self.failures = 0;
        self.set_state(GrabberState::Running);
    }

    fn release(&mut self) {
        self.interrupt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.stream = None;
    }

    fn set_state(&self, state: GrabberState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Sleep while still running; false if stopped meanwhile
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
        false
    }

    /// Thread body
    fn run(mut self) {
        info!(camera_id = self.camera_id, "Frame grabber started");

        let mut step = self.start();
        while !matches!(step, GrabStep::Stopped | GrabStep::ReconnectFailed) {
            step = self.step();
            if !self.config.grab_interval.is_zero() {
                std::thread::sleep(self.config.grab_interval);
            }
        }

        self.release();
        if step == GrabStep::Stopped {
            self.set_state(GrabberState::Stopped);
        }
        info!(
            camera_id = self.camera_id,
            frames = self.grabbed,
            reconnects = self.reconnects,
            "Frame grabber stopped"
        );
    }
}

/// Handle to a running grabber thread
pub struct FrameGrabber {
    camera_id: i64,
    running: Arc<AtomicBool>,
    interrupt: InterruptSlot,
    frames: FrameSlot,
    state: watch::Receiver<GrabberState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FrameGrabber {
    /// Spawn the grab thread for a camera
    pub fn start(
        camera_id: i64,
        source: CameraSource,
        backend: Arc<dyn CaptureBackend>,
        config: CaptureConfig,
    ) -> Result<Self, CameraError> {
        let grab_loop = GrabLoop::new(camera_id, source, backend, config);
        let running = grab_loop.running.clone();
        let interrupt = grab_loop.interrupt.clone();
        let frames = grab_loop.frame_receiver();
        let state = grab_loop.state_receiver();

        let thread = std::thread::Builder::new()
            .name(format!("grab-{}", camera_id))
            .spawn(move || grab_loop.run())
            .map_err(|e| CameraError::Open(format!("failed to spawn grab thread: {}", e)))?;

        Ok(Self {
            camera_id,
            running,
            interrupt,
            frames,
            state,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Newest frame, or `None` if nothing was grabbed yet
    pub fn get_frame(&self) -> Option<Arc<VideoFrame>> {
        self.frames.borrow().clone()
    }

    /// Current grabber state
    pub fn state(&self) -> GrabberState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn state_receiver(&self) -> watch::Receiver<GrabberState> {
        self.state.clone()
    }

    /// Ask the thread to exit. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!(camera_id = self.camera_id, "Stopping frame grabber");
        }
        let interrupt = self
            .interrupt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(interrupt) = interrupt {
            interrupt.interrupt();
        }
    }

    /// Stop and join the thread, giving up after `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        self.stop();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };

        let join = tokio::task::spawn_blocking(move || handle.join());
        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(_))) => error!(camera_id = self.camera_id, "Grab thread panicked"),
            Ok(Err(e)) => error!(camera_id = self.camera_id, "Join task failed: {}", e),
            Err(_) => warn!(
                camera_id = self.camera_id,
                "Grab thread did not exit within {:?}, detaching", timeout
            ),
        }
    }
}

impl Drop for FrameGrabber {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    fn mock_loop(config: CaptureConfig) -> (GrabLoop, Arc<crate::backend::MockControl>) {
        let backend = MockBackend::new(VideoFrame::filled(8, 8, [10, 20, 30]));
        let control = backend.control();
        let grab_loop = GrabLoop::new(1, CameraSource::parse("mock.mp4"), Arc::new(backend), config);
        (grab_loop, control)
    }

    #[test]
    fn test_reconnect_exactly_at_threshold() {
        let config = CaptureConfig {
            max_failures: 20,
            ..CaptureConfig::immediate()
        };
        let (mut grab_loop, control) = mock_loop(config);
        assert_eq!(grab_loop.start(), GrabStep::Reconnected);
        assert_eq!(control.opens(), 1);

        control.set_fail_reads(true);
        for i in 1..20 {
            assert_eq!(grab_loop.step(), GrabStep::ReadFailed(i));
            assert_eq!(control.opens(), 1, "no reconnect before threshold");
        }

        assert_eq!(grab_loop.step(), GrabStep::Reconnected);
        assert_eq!(control.opens(), 2, "exactly one reopen");
        assert_eq!(grab_loop.reconnects(), 1);
        assert_eq!(grab_loop.failures(), 0);

        control.set_fail_reads(false);
        let frames = grab_loop.frame_receiver();
        assert_eq!(grab_loop.step(), GrabStep::Frame);
        assert!(frames.borrow().is_some());
    }

    #[test]
    fn test_good_frame_resets_failures() {
        let (mut grab_loop, control) = mock_loop(CaptureConfig::immediate());
        grab_loop.start();
        control.set_fail_reads(true);
        for _ in 0..5 {
            grab_loop.step();
        }
        assert_eq!(grab_loop.failures(), 5);
        control.set_fail_reads(false);
        assert_eq!(grab_loop.step(), GrabStep::Frame);
        assert_eq!(grab_loop.failures(), 0);
    }

    #[test]
    fn test_exhausted_reconnect_is_terminal() {
        let config = CaptureConfig {
            max_failures: 3,
            reconnect_attempts: 3,
            ..CaptureConfig::immediate()
        };
        let (mut grab_loop, control) = mock_loop(config);
        let state = grab_loop.state_receiver();
        grab_loop.start();

        control.set_fail_reads(true);
        control.set_fail_opens(true);
        grab_loop.step();
        grab_loop.step();
        assert_eq!(grab_loop.step(), GrabStep::ReconnectFailed);
        assert_eq!(control.opens(), 1 + 3);
        assert_eq!(*state.borrow(), GrabberState::Failed);
    }

    #[test]
    fn test_initial_open_failure_enters_reconnect() {
        let (mut grab_loop, control) = mock_loop(CaptureConfig::immediate());
        control.set_fail_opens(true);
        assert_eq!(grab_loop.start(), GrabStep::ReconnectFailed);
        assert_eq!(control.opens(), 4);
    }

    #[test]
    fn test_frames_are_resequenced() {
        let (mut grab_loop, _control) = mock_loop(CaptureConfig::immediate());
        let frames = grab_loop.frame_receiver();
        grab_loop.start();
        grab_loop.step();
        grab_loop.step();
        assert_eq!(frames.borrow().as_ref().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_grabber_serves_latest_and_stops() {
        let template = VideoFrame::filled(16, 16, [1, 2, 3]);
        let backend = Arc::new(MockBackend::new(template.clone()));
        let config = CaptureConfig {
            grab_interval: Duration::from_millis(1),
            ..CaptureConfig::immediate()
        };
        let grabber = FrameGrabber::start(7, CameraSource::Device(0), backend, config).unwrap();

        let mut last_sequence = 0;
        let mut seen = 0;
        for _ in 0..200 {
            if let Some(frame) = grabber.get_frame() {
                // never torn: always a full copy of the template
                assert_eq!(frame.data, template.data);
                assert!(frame.sequence >= last_sequence);
                last_sequence = frame.sequence;
                seen += 1;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(seen > 0);
        assert_eq!(grabber.state(), GrabberState::Running);

        grabber.shutdown(Duration::from_secs(2)).await;
        assert_eq!(grabber.state(), GrabberState::Stopped);
        // idempotent
        grabber.stop();
        grabber.shutdown(Duration::from_secs(1)).await;
    }
}
