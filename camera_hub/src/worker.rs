//! Per-camera detection loop
//!
//! Each camera gets one worker on its own thread. The worker owns the frame
//! source and both detectors; nothing else touches them. It reads frames, crops
//! them to the camera's current zone, runs motion detection on every frame and
//! presence detection on a subset, and publishes alerts to the shared sink.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::events::{AlertEvent, CameraErrorEvent, CameraFault, CameraId, DetectionEvent};
use crate::frame_source::{OpenError, StreamSource};
use crate::sink::PublishError;
use crate::synthetic::SyntheticAlerts;
use crate::traits::{AlertSink, DetectionStore, FrameSource, FrameSourceFactory};
use crate::zone_store::ZoneReader;
use crossbeam_channel::{bounded, Receiver, Sender};
use secureeye_motion_ai::frame::Frame;
use secureeye_motion_ai::motion::detector::{MotionAnalyzer, MotionOutcome};
use secureeye_motion_ai::presence::PresenceAnalyzer;
use secureeye_motion_ai::traits::MotionDetector;
use secureeye_motion_ai::zone::{self, Zone};
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const MAX_READ_FAILURES: u32 = 10;
pub const READ_BACKOFF: Duration = Duration::from_millis(500);
pub const FRAME_PACE: Duration = Duration::from_millis(100);

/// Lifecycle of a camera worker.
///
/// Starting -> Running -> Stopping -> Stopped on a requested stop,
/// Running -> Stopping -> Failed when the camera stops responding, and
/// Starting -> Failed when the source cannot be opened.
#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "Starting",
            WorkerState::Running => "Running",
            WorkerState::Stopping => "Stopping",
            WorkerState::Stopped => "Stopped",
            WorkerState::Failed => "Failed",
        }
    }

    /// The worker thread has exited or is about to.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }
}

/// Running counters for one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames_read: u64,
    pub frames_analyzed: u64,
    /// Frames read while no usable zone was set.
    pub zone_skips: u64,
    pub motion_detections: u64,
    pub presence_detections: u64,
    pub alerts_published: u64,
    /// Alerts the sink refused (full or disconnected).
    pub alerts_dropped: u64,
    pub read_failures: u64,
    pub detector_faults: u64,
}

/// Timing and failure limits for a worker loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPolicy {
    pub max_read_failures: u32,
    pub read_backoff: Duration,
    pub frame_pace: Duration,
    pub test_alert_interval: Option<Duration>,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        WorkerPolicy {
            max_read_failures: MAX_READ_FAILURES,
            read_backoff: READ_BACKOFF,
            frame_pace: FRAME_PACE,
            test_alert_interval: None,
        }
    }
}

/// The detectors one worker runs. Built fresh for every worker.
pub struct Detectors {
    pub motion: Box<dyn MotionDetector>,
    pub presence: Option<PresenceAnalyzer>,
}

impl Detectors {
    /// Frame-differencing motion plus, when `presence_every` is set, the shape
    /// based presence detector on every Nth frame.
    pub fn standard(presence_every: Option<u32>) -> Self {
        Detectors {
            motion: Box::new(MotionAnalyzer::new()),
            presence: presence_every.map(PresenceAnalyzer::people),
        }
    }

    fn reset(&mut self) {
        self.motion.reset();
        if let Some(presence) = self.presence.as_mut() {
            presence.reset();
        }
    }
}

pub type DetectorFactory = Arc<dyn Fn() -> Detectors + Send + Sync>;

pub fn standard_detectors(presence: bool, presence_every: u32) -> DetectorFactory {
    let every = presence.then_some(presence_every);
    Arc::new(move || Detectors::standard(every))
}

/// Cooperative stop signal shared by a worker and its supervisor.
///
/// The flag doubles as the alert gate: a worker publishes only while holding it
/// and only if it is unset, so once `stop` returns no further alert from that
/// worker can reach the sink.
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        *self.lock() = true;
        self.inner.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.lock()
    }

    /// Sleeps up to `timeout`, waking early on stop. Returns whether stopped.
    pub fn pause(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .wake
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Runs `f` unless stopped, holding off `stop` until `f` returns.
    pub fn while_running<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let guard = self.lock();
        if *guard {
            return None;
        }
        let result = f();
        drop(guard);
        Some(result)
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// State and counters a worker publishes for its supervisor.
pub struct WorkerStatus {
    state: Mutex<WorkerState>,
    stats: Mutex<WorkerStats>,
}

impl WorkerStatus {
    fn new() -> Self {
        WorkerStatus {
            state: Mutex::new(WorkerState::Starting),
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> WorkerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn set_stats(&self, stats: WorkerStats) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = stats;
    }
}

/// Everything a worker needs, handed over once at construction.
pub struct WorkerSetup {
    pub camera_id: CameraId,
    pub source: StreamSource,
    pub opener: Arc<dyn FrameSourceFactory>,
    pub zone: ZoneReader,
    pub detectors: Detectors,
    pub sink: Arc<dyn AlertSink>,
    pub store: Option<Arc<dyn DetectionStore>>,
    pub policy: WorkerPolicy,
}

enum LoopExit {
    Cancelled,
    Unresponsive,
}

pub struct CameraWorker {
    camera_id: CameraId,
    source: StreamSource,
    opener: Arc<dyn FrameSourceFactory>,
    zone: ZoneReader,
    detectors: Detectors,
    sink: Arc<dyn AlertSink>,
    store: Option<Arc<dyn DetectionStore>>,
    policy: WorkerPolicy,
    stop: StopToken,
    status: Arc<WorkerStatus>,
    stats: WorkerStats,
    synthetic: Option<SyntheticAlerts>,
    last_zone: Option<Zone>,
    frame_index: u64,
}

impl CameraWorker {
    pub fn new(setup: WorkerSetup) -> Self {
        CameraWorker {
            synthetic: setup.policy.test_alert_interval.map(SyntheticAlerts::new),
            camera_id: setup.camera_id,
            source: setup.source,
            opener: setup.opener,
            zone: setup.zone,
            detectors: setup.detectors,
            sink: setup.sink,
            store: setup.store,
            policy: setup.policy,
            stop: StopToken::new(),
            status: Arc::new(WorkerStatus::new()),
            stats: WorkerStats::default(),
            last_zone: None,
            frame_index: 0,
        }
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    /// Starts the worker on its own thread. The receiver yields exactly one
    /// value once the source has been opened (or failed to open).
    pub fn spawn(self) -> io::Result<(JoinHandle<()>, Receiver<Result<(), OpenError>>)> {
        let (startup_tx, startup_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name(format!("camera-{}", self.camera_id))
            .spawn(move || self.run(startup_tx))?;
        Ok((handle, startup_rx))
    }

    fn run(mut self, startup: Sender<Result<(), OpenError>>) {
        debug!("[{}] Opening {}", self.camera_id, self.source);
        let mut source = match self.opener.open(&self.source) {
            Ok(source) => source,
            Err(e) => {
                error!("[{}] Failed to open {}: {e}", self.camera_id, self.source);
                self.status.set_state(WorkerState::Failed);
                self.emit(AlertEvent::CameraError(CameraErrorEvent::new(
                    self.camera_id.clone(),
                    CameraFault::OpenFailed,
                )));
                self.publish_stats();
                let _ = startup.send(Err(e));
                return;
            }
        };

        self.status.set_state(WorkerState::Running);
        let _ = startup.send(Ok(()));
        drop(startup);

        let exit = self.run_loop(source.as_mut());

        self.status.set_state(WorkerState::Stopping);
        source.close();
        drop(source);
        self.detectors.reset();
        self.publish_stats();

        let final_state = match exit {
            LoopExit::Cancelled => WorkerState::Stopped,
            LoopExit::Unresponsive => WorkerState::Failed,
        };
        self.status.set_state(final_state);
        info!(
            "[{}] Worker {} after {} frames ({} analyzed, {} alerts dropped)",
            self.camera_id,
            final_state,
            self.stats.frames_read,
            self.stats.frames_analyzed,
            self.stats.alerts_dropped
        );
    }

    fn run_loop(&mut self, source: &mut dyn FrameSource) -> LoopExit {
        let mut consecutive_failures = 0u32;

        while !self.stop.is_stopped() {
            let frame = match source.read() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    frame
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.stats.read_failures += 1;
                    self.publish_stats();
                    if self.stop.is_stopped() {
                        break;
                    }

                    warn!(
                        "[{}] Failed to read frame ({}/{}): {e}",
                        self.camera_id, consecutive_failures, self.policy.max_read_failures
                    );
                    if consecutive_failures >= self.policy.max_read_failures {
                        error!(
                            "[{}] Camera unresponsive after {} failed reads",
                            self.camera_id, consecutive_failures
                        );
                        self.emit(AlertEvent::CameraError(CameraErrorEvent::new(
                            self.camera_id.clone(),
                            CameraFault::CameraUnresponsive,
                        )));
                        return LoopExit::Unresponsive;
                    }
                    if self.stop.pause(self.policy.read_backoff) {
                        break;
                    }
                    continue;
                }
            };

            if self.stop.is_stopped() {
                break;
            }
            self.process(&frame);
            self.poll_synthetic();
            self.publish_stats();

            if self.stop.pause(self.policy.frame_pace) {
                break;
            }
        }

        LoopExit::Cancelled
    }

    /// Analyzes one frame against the zone as it is right now.
    fn process(&mut self, frame: &Frame) {
        self.frame_index += 1;
        self.stats.frames_read += 1;

        // One snapshot per pass; a concurrent update applies from the next frame.
        let zone = self
            .zone
            .current()
            .and_then(|z| z.clamp_to(frame.width(), frame.height()));
        if zone != self.last_zone {
            match zone {
                Some(z) => info!("[{}] Watching zone {z}", self.camera_id),
                None => info!("[{}] No usable zone, analysis paused", self.camera_id),
            }
            self.detectors.reset();
            self.last_zone = zone;
        }

        let Some(crop) = zone.and_then(|z| zone::crop(frame, &z)) else {
            self.stats.zone_skips += 1;
            return;
        };
        let zone = crop.zone();
        self.stats.frames_analyzed += 1;

        match self.detectors.motion.analyze(crop.image()) {
            Ok(MotionOutcome::Motion(detection)) => {
                self.stats.motion_detections += 1;
                info!(
                    "[{}] Motion in frame {}: {} region(s), {} px, confidence {:.2}",
                    self.camera_id,
                    frame.seq(),
                    detection.count,
                    detection.area,
                    detection.confidence
                );
                let event = DetectionEvent::motion(
                    self.camera_id.clone(),
                    zone,
                    &detection,
                    frame.captured_at(),
                );
                self.emit_detection(event);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("[{}] Motion detector fault: {e}", self.camera_id);
                self.stats.detector_faults += 1;
                self.detectors.motion.reset();
            }
        }

        let frame_index = self.frame_index;
        let presence = match self.detectors.presence.as_mut() {
            Some(analyzer) if analyzer.is_due(frame_index) => Some(analyzer.analyze(crop.image())),
            _ => None,
        };
        match presence {
            Some(Ok(Some(detection))) => {
                self.stats.presence_detections += 1;
                info!(
                    "[{}] Presence in frame {}: {} person(s), confidence {:.2}",
                    self.camera_id,
                    frame.seq(),
                    detection.count,
                    detection.confidence
                );
                let event = DetectionEvent::presence(
                    self.camera_id.clone(),
                    zone,
                    &detection,
                    frame.captured_at(),
                );
                self.emit_detection(event);
            }
            Some(Err(e)) => {
                warn!("[{}] Presence detector fault: {e}", self.camera_id);
                self.stats.detector_faults += 1;
                if let Some(analyzer) = self.detectors.presence.as_mut() {
                    analyzer.reset();
                }
            }
            Some(Ok(None)) | None => {}
        }
    }

    fn poll_synthetic(&mut self) {
        let due = self
            .synthetic
            .as_mut()
            .is_some_and(|timer| timer.poll(Instant::now()));
        if due {
            info!("[{}] Sending test alert", self.camera_id);
            self.emit(AlertEvent::Detection(SyntheticAlerts::event(&self.camera_id)));
        }
    }

    fn emit_detection(&mut self, event: DetectionEvent) {
        if let Some(store) = &self.store {
            if !self.stop.is_stopped() {
                if let Err(e) = store.record(&event) {
                    warn!("[{}] Could not record detection: {e:#}", self.camera_id);
                }
            }
        }
        self.emit(AlertEvent::Detection(event));
    }

    /// Publishes through the stop gate. Returns whether the sink accepted it.
    fn emit(&mut self, event: AlertEvent) -> bool {
        match self.stop.while_running(|| self.sink.publish(event)) {
            Some(Ok(())) => {
                self.stats.alerts_published += 1;
                true
            }
            Some(Err(PublishError::Full)) => {
                self.stats.alerts_dropped += 1;
                warn!("[{}] Alert queue full, alert dropped", self.camera_id);
                false
            }
            Some(Err(PublishError::Disconnected)) => {
                self.stats.alerts_dropped += 1;
                warn!("[{}] No alert consumer, alert dropped", self.camera_id);
                false
            }
            None => {
                debug!("[{}] Stopped, alert suppressed", self.camera_id);
                false
            }
        }
    }

    fn publish_stats(&self) {
        self.status.set_stats(self.stats);
    }
}
