//! ffmpeg subprocess capture backend
//!
//! Decodes any source ffmpeg understands into raw `rgb24` frames on stdout.

use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::backend::{CaptureBackend, CaptureStream, StreamInterrupt};
use crate::{CameraError, CameraSource, CaptureConfig, VideoFrame};

/// Capture backend spawning one `ffmpeg` process per stream
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    /// ffmpeg executable
    binary: PathBuf,
    /// Socket timeout for network sources
    network_timeout: Duration,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            network_timeout: Duration::from_secs(5),
        }
    }
}

impl FfmpegBackend {
    pub fn new(binary: impl Into<PathBuf>, network_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            network_timeout,
        }
    }

    fn build_args(&self, source: &CameraSource, config: &CaptureConfig) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match source {
            CameraSource::Network(url) => {
                if source.is_rtsp() {
                    args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
                }
                args.extend([
                    "-timeout".to_string(),
                    self.network_timeout.as_micros().to_string(),
                    "-i".to_string(),
                    url.clone(),
                ]);
            }
            CameraSource::File(path) => {
                // Pace files at their native rate instead of decoding flat out
                args.extend([
                    "-re".to_string(),
                    "-i".to_string(),
                    path.display().to_string(),
                ]);
            }
            CameraSource::Device(_) => {
                args.extend([
                    "-f".to_string(),
                    "v4l2".to_string(),
                    "-i".to_string(),
                    source.to_string(),
                ]);
            }
        }

        args.extend([
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={}:{},fps={}", config.width, config.height, config.fps.max(1)),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }
}

impl CaptureBackend for FfmpegBackend {
    fn open(
        &self,
        source: &CameraSource,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureStream>, CameraError> {
        let args = self.build_args(source, config);
        debug!(source = %source, ?args, "Spawning ffmpeg");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CameraError::Open(format!("{}: {}", self.binary.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::Open("ffmpeg stdout not captured".to_string()))?;

        let mut stream = FfmpegStream {
            child: Arc::new(Mutex::new(child)),
            stdout,
            width: config.width,
            height: config.height,
            started: Instant::now(),
            sequence: 0,
            pending: None,
        };

        // A stream only counts as open once it has produced a frame
        match stream.read_frame() {
            Ok(first) => {
                stream.pending = Some(first);
                Ok(Box::new(stream))
            }
            Err(e) => Err(CameraError::Open(format!("{}: {}", source, e))),
        }
    }
}

/// Kills the ffmpeg child, which closes its stdout and wakes the reader
struct ChildKiller {
    child: Arc<Mutex<Child>>,
}

impl StreamInterrupt for ChildKiller {
    fn interrupt(&self) {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                warn!("Failed to kill ffmpeg: {}", e);
            }
        }
    }
}

struct FfmpegStream {
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    started: Instant,
    sequence: u64,
    pending: Option<VideoFrame>,
}

impl CaptureStream for FfmpegStream {
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }

        let mut buf = vec![0u8; (self.width as usize) * (self.height as usize) * 3];
        self.stdout.read_exact(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => CameraError::EndOfStream,
            ErrorKind::Interrupted => CameraError::Interrupted,
            _ => CameraError::Read(e.to_string()),
        })?;

        self.sequence += 1;
        VideoFrame::new(
            buf,
            self.width,
            self.height,
            self.started.elapsed().as_nanos() as u64,
            self.sequence,
        )
    }

    fn interrupter(&self) -> Option<Arc<dyn StreamInterrupt>> {
        Some(Arc::new(ChildKiller {
            child: self.child.clone(),
        }))
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        let _ = child.kill();
        let _ = child.wait();
    }
}
