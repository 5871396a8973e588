//! Per-camera detector pipeline
//!
//! A grabber thread feeds the latest frame; a tokio task runs detection
//! cycles on a fixed cadence, with locate and classify on the blocking pool.
//! The annotated result of each cycle replaces the previous one in a
//! single-slot `watch` channel.

use crate::annotate::{annotate, FaceMark};
use crate::config::PipelineConfig;
use crate::gate::FaceSkipGate;
use crate::MonitorError;
use alerting::{AlertEmitter, EmotionSmoother, SmoothingDecision};
use camera_capture::{
    CameraSource, CaptureBackend, CaptureConfig, FrameGrabber, GrabberState, VideoFrame,
};
use face_locator::FaceLocator;
use inference_engine::{EmotionClassifier, EmotionLabel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use storage::CameraId;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    /// Source is being reopened; the last processed frame is still served
    Reconnecting,
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Reconnecting => "reconnecting",
            PipelineState::Stopped => "stopped",
        }
    }
}

/// Reported by pipelines to their owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The source could not be reopened; the pipeline has stopped
    SourceFailed(CameraId),
}

/// Alert raised during a cycle, emitted after the blocking work completes
#[derive(Debug, Clone)]
pub struct PendingAlert {
    pub face: VideoFrame,
    pub label: EmotionLabel,
    pub confidence: f32,
}

/// Result of one detection cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub annotated: VideoFrame,
    /// Faces returned by the locator (0 when skipped or failed)
    pub faces: usize,
    /// Faces that were classified
    pub marks: Vec<FaceMark>,
    pub alerts: Vec<PendingAlert>,
    /// Whether the locator ran this cycle
    pub located: bool,
}

/// Synchronous detection cycle: locate, classify, smooth, annotate
pub struct CycleProcessor {
    camera_id: CameraId,
    locator: Arc<dyn FaceLocator>,
    classifier: Arc<dyn EmotionClassifier>,
    gate: FaceSkipGate,
    smoother: EmotionSmoother,
    face_confidence: f32,
}

impl CycleProcessor {
    pub fn new(
        camera_id: CameraId,
        locator: Arc<dyn FaceLocator>,
        classifier: Arc<dyn EmotionClassifier>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            camera_id,
            locator,
            classifier,
            gate: FaceSkipGate::new(config.no_face_threshold, config.skip_cooldown),
            smoother: EmotionSmoother::new(config.smoothing.clone()),
            face_confidence: config.face_confidence,
        }
    }

    pub fn process(&mut self, frame: &VideoFrame) -> CycleOutcome {
        let located = self.gate.should_locate();
        let faces = if located {
            match self.locator.locate(frame, self.face_confidence) {
                Ok(faces) => {
                    self.gate.record(!faces.is_empty());
                    faces
                }
                Err(e) => {
                    warn!(camera_id = self.camera_id, "Face location failed: {}", e);
                    metrics::counter!("locator_errors_total").increment(1);
                    self.gate.record(false);
                    Vec::new()
                }
            }
        } else {
            debug!(camera_id = self.camera_id, counter = self.gate.counter(), "Skipping face detection");
            Vec::new()
        };

        let mut marks = Vec::with_capacity(faces.len());
        let mut alerts = Vec::new();
        for face in &faces {
            let Some(crop) = frame.crop(face.x, face.y, face.width, face.height) else {
                continue;
            };
            let observation = match self.classifier.classify(&crop) {
                Ok(observation) => observation,
                Err(e) => {
                    warn!(camera_id = self.camera_id, "Classification failed: {}", e);
                    metrics::counter!("classifier_errors_total").increment(1);
                    continue;
                }
            };
            debug!(
                camera_id = self.camera_id,
                emotion = observation.label.as_str(),
                confidence = observation.confidence,
                "Predicted emotion"
            );

            if let SmoothingDecision::Alert(label) = self.smoother.observe(observation) {
                alerts.push(PendingAlert {
                    face: crop,
                    label,
                    confidence: observation.confidence,
                });
            }
            marks.push(FaceMark {
                face: *face,
                observation,
            });
        }

        CycleOutcome {
            annotated: annotate(frame, &marks),
            faces: faces.len(),
            marks,
            alerts,
            located,
        }
    }

    pub fn smoother(&self) -> &EmotionSmoother {
        &self.smoother
    }
}

/// Shared collaborators every pipeline is started with
#[derive(Clone)]
pub struct PipelineDeps {
    pub backend: Arc<dyn CaptureBackend>,
    pub locator: Arc<dyn FaceLocator>,
    pub classifier: Arc<dyn EmotionClassifier>,
    pub emitter: Arc<AlertEmitter>,
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub events: mpsc::Sender<PipelineEvent>,
}

struct PipelineTask {
    camera_id: CameraId,
    grabber: Arc<FrameGrabber>,
    processor: CycleProcessor,
    emitter: Arc<AlertEmitter>,
    config: PipelineConfig,
    processed_tx: watch::Sender<Option<Arc<VideoFrame>>>,
    state_tx: watch::Sender<PipelineState>,
    stop_rx: watch::Receiver<bool>,
    events: mpsc::Sender<PipelineEvent>,
}

impl PipelineTask {
    async fn run(mut self) {
        info!(camera_id = self.camera_id, "Detection loop started");
        let interval = self.config.detection_interval();
        let idle_wait = self.config.idle_wait();
        let mut last_sequence = 0u64;
        let mut next_cycle = Instant::now();

        loop {
            if *self.stop_rx.borrow() {
                break;
            }

            // Cadence wait comes before taking the frame
            let now = Instant::now();
            if now < next_cycle && !self.pause(next_cycle - now).await {
                break;
            }

            match self.grabber.state() {
                GrabberState::Failed => {
                    error!(camera_id = self.camera_id, "Source failed permanently, stopping pipeline");
                    self.state_tx.send_replace(PipelineState::Stopped);
                    if self.events.send(PipelineEvent::SourceFailed(self.camera_id)).await.is_err() {
                        warn!(camera_id = self.camera_id, "Pipeline event receiver closed");
                    }
                    return;
                }
                GrabberState::Reconnecting => self.set_state(PipelineState::Reconnecting),
                GrabberState::Running => self.set_state(PipelineState::Running),
                GrabberState::Starting | GrabberState::Stopped => {}
            }

            let frame = match self.grabber.get_frame() {
                Some(frame) if frame.sequence > last_sequence => frame,
                _ => {
                    if !self.pause(idle_wait).await {
                        break;
                    }
                    continue;
                }
            };
            next_cycle = Instant::now() + interval;
            last_sequence = frame.sequence;

            let started = Instant::now();
            let mut processor = self.processor;
            let joined = tokio::task::spawn_blocking(move || {
                let outcome = processor.process(&frame);
                (processor, outcome)
            })
            .await;
            let outcome = match joined {
                Ok((processor, outcome)) => {
                    self.processor = processor;
                    outcome
                }
                Err(e) => {
                    error!(camera_id = self.camera_id, "Detection cycle panicked: {}", e);
                    self.state_tx.send_replace(PipelineState::Stopped);
                    return;
                }
            };

            for alert in &outcome.alerts {
                // Best effort: failures are logged by the emitter
                let _ = self
                    .emitter
                    .emit(self.camera_id, &alert.face, alert.label, alert.confidence)
                    .await;
            }

            self.processed_tx.send_replace(Some(Arc::new(outcome.annotated)));
            metrics::counter!("detection_cycles_total").increment(1);
            metrics::histogram!("detection_cycle_seconds").record(started.elapsed().as_secs_f64());

            tokio::task::yield_now().await;
        }

        self.state_tx.send_replace(PipelineState::Stopped);
        info!(camera_id = self.camera_id, "Detection loop stopped");
    }

    fn set_state(&self, state: PipelineState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Sleep unless stopped first; false when stopped
    async fn pause(&mut self, duration: Duration) -> bool {
        let signalled = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.stop_rx.changed() => true,
        };
        !signalled && !*self.stop_rx.borrow()
    }
}

/// Handle to a running camera pipeline
pub struct DetectorPipeline {
    camera_id: CameraId,
    source: CameraSource,
    grabber: Arc<FrameGrabber>,
    processed: watch::Receiver<Option<Arc<VideoFrame>>>,
    state: watch::Receiver<PipelineState>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DetectorPipeline {
    /// Start the grabber thread and the detection task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        camera_id: CameraId,
        source: CameraSource,
        deps: &PipelineDeps,
    ) -> Result<Self, MonitorError> {
        let grabber = Arc::new(FrameGrabber::start(
            camera_id,
            source.clone(),
            deps.backend.clone(),
            deps.capture.clone(),
        )?);
        let (processed_tx, processed) = watch::channel(None);
        let (state_tx, state) = watch::channel(PipelineState::Starting);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = PipelineTask {
            camera_id,
            grabber: grabber.clone(),
            processor: CycleProcessor::new(
                camera_id,
                deps.locator.clone(),
                deps.classifier.clone(),
                &deps.pipeline,
            ),
            emitter: deps.emitter.clone(),
            config: deps.pipeline.clone(),
            processed_tx,
            state_tx,
            stop_rx,
            events: deps.events.clone(),
        };
        let handle = tokio::spawn(task.run());
        info!(camera_id, source = %source, "Pipeline started");

        Ok(Self {
            camera_id,
            source,
            grabber,
            processed,
            state,
            stop_tx,
            task: Mutex::new(Some(handle)),
        })
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn source(&self) -> &CameraSource {
        &self.source
    }

    /// Latest annotated frame, if any cycle has completed
    pub fn get_frame(&self) -> Option<Arc<VideoFrame>> {
        self.processed.borrow().clone()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn grabber_state(&self) -> GrabberState {
        self.grabber.state()
    }

    /// Signal the task and the grabber to stop. Idempotent.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        self.grabber.stop();
    }

    /// Stop and wait for both the grabber and the task, each bounded by `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        self.stop();
        self.grabber.shutdown(timeout).await;

        let handle = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(camera_id = self.camera_id, "Pipeline task failed: {}", e),
                Err(_) => {
                    warn!(camera_id = self.camera_id, "Pipeline task did not stop within {:?}, aborting", timeout);
                    abort.abort();
                }
            }
        }
        info!(camera_id = self.camera_id, "Pipeline stopped");
    }
}

impl Drop for DetectorPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
