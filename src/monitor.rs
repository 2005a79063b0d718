//! Monitoring lifecycle
//!
//! [`ThreatMonitor`] is the surface a host application drives. It owns the
//! shared fusion engine and capture buffers, and while a session is running:
//! - an audio producer thread appends capture chunks to the sample buffer
//! - an optional camera producer thread publishes the newest frame
//! - a worker thread runs one pipeline tick per interval
//!
//! Every thread listens on the same crossbeam shutdown channel. `stop()`
//! drops the sender, which wakes all of them, then joins them so devices are
//! closed before it returns.

use crate::buffer::{FrameSlot, SampleBuffer};
use crate::capture::{AudioCapture, FrameCapture, SyntheticAudioSource};
use crate::classifier::EmotionClassifier;
use crate::config::{AudioSourceKind, MonitorConfig};
use crate::context::ContextEngine;
use crate::error::{panic_message, ThreatError};
use crate::fusion::FusionEngine;
use crate::motion::{Frame, MotionScorer};
use crate::pipeline::{ThreatPipeline, TickInputs};
use crate::speech::SpeechScorer;
use crate::types::{LocationContext, StateTransition, ThreatSnapshot, Transcript};
use chrono::{Local, Timelike, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

/// Back-off when a capture source has nothing to deliver
const CAPTURE_IDLE: Duration = Duration::from_millis(10);

/// Result of `ThreatMonitor::start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { session_id: Uuid },
    /// A session was already running; nothing was reset
    AlreadyRunning { session_id: Uuid },
}

impl StartOutcome {
    pub fn session_id(&self) -> Uuid {
        match self {
            StartOutcome::Started { session_id } | StartOutcome::AlreadyRunning { session_id } => *session_id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StartOutcome::Started { .. } => "started",
            StartOutcome::AlreadyRunning { .. } => "already_running",
        }
    }
}

/// Result of `ThreatMonitor::stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

impl StopOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopOutcome::Stopped => "stopped",
            StopOutcome::NotRunning => "not_running",
        }
    }
}

/// Host-provided side inputs consumed by the next tick
#[derive(Default)]
struct Inbox {
    transcript: Mutex<Option<Transcript>>,
    location: Mutex<LocationContext>,
    reset_motion: AtomicBool,
}

/// Owned state that lives on the worker threads while a session runs
struct Resources {
    pipeline: ThreatPipeline,
    audio: Option<Box<dyn AudioCapture>>,
    camera: Option<Box<dyn FrameCapture>>,
}

struct RunningSession {
    shutdown: Sender<()>,
    worker: JoinHandle<Option<ThreatPipeline>>,
    audio: Option<JoinHandle<Option<Box<dyn AudioCapture>>>>,
    camera: Option<JoinHandle<Option<Box<dyn FrameCapture>>>>,
    /// Devices that were not started this session
    parked_audio: Option<Box<dyn AudioCapture>>,
    parked_camera: Option<Box<dyn FrameCapture>>,
}

enum Session {
    Idle(Resources),
    Running(RunningSession),
    /// Only observed while a lifecycle call is moving resources around
    Transitioning,
}

/// Shared handles the tick worker needs
struct TickContext {
    session_id: Uuid,
    window_seconds: f64,
    fusion: Arc<FusionEngine>,
    audio: Arc<SampleBuffer>,
    frames: Arc<FrameSlot>,
    inbox: Arc<Inbox>,
    subscribers: Arc<Mutex<Vec<Sender<StateTransition>>>>,
}

impl TickContext {
    fn tick(&self, pipeline: &mut ThreatPipeline) {
        if self.inbox.reset_motion.swap(false, Ordering::AcqRel) {
            pipeline.reset_motion();
            log::info!("Motion background model reset");
        }

        let inputs = TickInputs {
            window: self.audio.take_window(self.window_seconds),
            frame: self.frames.take(),
            transcript: self.inbox.transcript.lock().take(),
            location: *self.inbox.location.lock(),
            hour: Local::now().hour(),
        };
        let report = pipeline.tick(inputs, &self.fusion, Utc::now());

        if report.outcome.transitioned() {
            let event = StateTransition {
                session_id: self.session_id,
                from: report.outcome.previous,
                to: report.outcome.state.current_state,
                score: report.outcome.state.current_score,
                at: report.outcome.entry.timestamp,
            };
            publish(&self.subscribers, event);
        }
    }
}

fn publish(subscribers: &Mutex<Vec<Sender<StateTransition>>>, event: StateTransition) {
    subscribers.lock().retain(|tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::debug!("Transition subscriber queue full, event dropped");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    });
}

fn run_worker(
    ctx: TickContext,
    mut pipeline: ThreatPipeline,
    shutdown: Receiver<()>,
    interval: Duration,
) -> ThreatPipeline {
    loop {
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| ctx.tick(&mut pipeline))) {
            log::error!("Tick failed, keeping previous state: {}", panic_message(payload.as_ref()));
        }
    }
    pipeline
}

fn run_audio(
    mut capture: Box<dyn AudioCapture>,
    buffer: Arc<SampleBuffer>,
    shutdown: Receiver<()>,
) -> Box<dyn AudioCapture> {
    while matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
        match capture.read_chunk() {
            Some(chunk) => buffer.push(&chunk),
            None => {
                let _ = shutdown.recv_timeout(CAPTURE_IDLE);
            }
        }
    }
    capture.close();
    capture
}

fn run_camera(
    mut capture: Box<dyn FrameCapture>,
    slot: Arc<FrameSlot>,
    shutdown: Receiver<()>,
) -> Box<dyn FrameCapture> {
    while matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
        match capture.read_frame() {
            Some(frame) => slot.publish(frame),
            None => {
                let _ = shutdown.recv_timeout(CAPTURE_IDLE);
            }
        }
    }
    capture.close();
    capture
}

/// Spawn a named thread that receives `payload` only once it is running, so
/// a failed spawn hands the payload back
fn spawn_with<T, R>(
    name: &str,
    payload: T,
    body: impl FnOnce(T) -> R + Send + 'static,
) -> Result<JoinHandle<Option<R>>, (ThreatError, T)>
where
    T: Send + 'static,
    R: Send + 'static,
{
    let (handoff, receiver) = bounded::<T>(1);
    let spawned = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || receiver.recv().ok().map(body));

    match spawned {
        Ok(handle) => match handoff.send(payload) {
            Ok(()) => Ok(handle),
            Err(SendError(payload)) => Err((ThreatError::Worker(format!("{name} exited before start")), payload)),
        },
        Err(e) => Err((ThreatError::Worker(format!("failed to spawn {name}: {e}")), payload)),
    }
}

/// Join a session thread and take back what it owned; anything that was never
/// handed to a thread is returned as is
fn join_capture<T>(handle: Option<JoinHandle<Option<T>>>, parked: Option<T>, what: &str) -> Option<T> {
    match handle {
        Some(handle) => handle.join().unwrap_or_else(|payload| {
            log::error!("{what} thread panicked: {}", panic_message(payload.as_ref()));
            None
        }),
        None => parked,
    }
}

/// Builder for a [`ThreatMonitor`] with custom capture or classifier seams
#[derive(Default)]
pub struct ThreatMonitorBuilder {
    config: Option<MonitorConfig>,
    audio: Option<Box<dyn AudioCapture>>,
    camera: Option<Box<dyn FrameCapture>>,
    classifier: Option<Box<dyn EmotionClassifier>>,
}

impl ThreatMonitorBuilder {
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Microphone to use instead of the synthetic generator
    pub fn audio_capture(mut self, capture: Box<dyn AudioCapture>) -> Self {
        self.audio = Some(capture);
        self
    }

    /// Camera; without one the motion path reports missing frames
    pub fn frame_capture(mut self, capture: Box<dyn FrameCapture>) -> Self {
        self.camera = Some(capture);
        self
    }

    /// Emotion classifier tried before the spectral heuristic
    pub fn classifier(mut self, classifier: Box<dyn EmotionClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> Result<ThreatMonitor, ThreatError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let speech = match self.classifier {
            Some(classifier) => SpeechScorer::with_classifier(config.speech.clone(), classifier),
            None => SpeechScorer::from_config(&config),
        };
        let pipeline = ThreatPipeline::new(
            speech,
            MotionScorer::new(config.motion.clone()),
            ContextEngine::new(config.context.clone()),
        );

        Ok(ThreatMonitor {
            fusion: Arc::new(FusionEngine::from_config(&config)),
            audio: Arc::new(SampleBuffer::new(config.buffer_capacity(), config.sample_rate)),
            frames: Arc::new(FrameSlot::new()),
            inbox: Arc::new(Inbox::default()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            session_id: Mutex::new(None),
            session: Mutex::new(Session::Idle(Resources {
                pipeline,
                audio: self.audio,
                camera: self.camera,
            })),
            config,
            #[cfg(test)]
            refuse_worker: AtomicBool::new(false),
        })
    }
}

/// Continuous threat monitor
pub struct ThreatMonitor {
    config: MonitorConfig,
    fusion: Arc<FusionEngine>,
    audio: Arc<SampleBuffer>,
    frames: Arc<FrameSlot>,
    inbox: Arc<Inbox>,
    subscribers: Arc<Mutex<Vec<Sender<StateTransition>>>>,
    session_id: Mutex<Option<Uuid>>,
    session: Mutex<Session>,
    #[cfg(test)]
    refuse_worker: AtomicBool,
}

impl ThreatMonitor {
    /// Monitor with default capture (synthetic audio, no camera)
    pub fn new(config: MonitorConfig) -> Result<Self, ThreatError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ThreatMonitorBuilder {
        ThreatMonitorBuilder::default()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Shared fusion engine
    pub fn fusion(&self) -> &Arc<FusionEngine> {
        &self.fusion
    }

    pub fn is_active(&self) -> bool {
        self.session_id.lock().is_some()
    }

    /// Start a monitoring session.
    ///
    /// Resets fusion state and starts capture and the tick worker. Calling
    /// it while a session runs changes nothing and reports `AlreadyRunning`.
    pub fn start(&self) -> Result<StartOutcome, ThreatError> {
        let mut session = self.session.lock();
        if let Some(session_id) = *self.session_id.lock() {
            return Ok(StartOutcome::AlreadyRunning { session_id });
        }

        let resources = match std::mem::replace(&mut *session, Session::Transitioning) {
            Session::Idle(resources) => resources,
            other => {
                *session = other;
                return Err(ThreatError::Worker("monitor is in an inconsistent state".to_string()));
            }
        };

        let session_id = Uuid::new_v4();
        self.fusion.reset();
        self.audio.clear();
        self.frames.clear();
        self.inbox.transcript.lock().take();
        self.inbox.reset_motion.store(false, Ordering::Release);

        match self.launch(resources, session_id) {
            Ok(running) => {
                *session = Session::Running(running);
                *self.session_id.lock() = Some(session_id);
                log::info!("Monitoring started (session {session_id})");
                Ok(StartOutcome::Started { session_id })
            }
            Err((e, resources)) => {
                log::error!("Failed to start monitoring: {e}");
                *session = Session::Idle(resources);
                Err(e)
            }
        }
    }

    /// Open devices and spawn the producer and worker threads. On failure
    /// every thread already started is joined and the resources come back.
    fn launch(&self, resources: Resources, session_id: Uuid) -> Result<RunningSession, (ThreatError, Resources)> {
        let Resources {
            mut pipeline,
            audio,
            camera,
        } = resources;
        pipeline.reset();

        let (shutdown, shutdown_rx) = bounded::<()>(0);

        let mut audio_thread = None;
        let mut parked_audio = None;
        match self.config.audio_source {
            AudioSourceKind::External => {
                log::info!("Audio is fed by the host");
                parked_audio = audio;
            }
            AudioSourceKind::Synthetic => {
                let capture = self.open_audio(audio);
                let buffer = Arc::clone(&self.audio);
                let rx = shutdown_rx.clone();
                match spawn_with("threatsense-audio", capture, move |capture| run_audio(capture, buffer, rx)) {
                    Ok(handle) => audio_thread = Some(handle),
                    Err((e, mut capture)) => {
                        capture.close();
                        return Err((
                            e,
                            Resources {
                                pipeline,
                                audio: Some(capture),
                                camera,
                            },
                        ));
                    }
                }
            }
        }

        let mut camera_thread = None;
        let mut parked_camera = None;
        match camera.map(Self::open_camera) {
            Some(Ok(capture)) => {
                let slot = Arc::clone(&self.frames);
                let rx = shutdown_rx.clone();
                match spawn_with("threatsense-camera", capture, move |capture| run_camera(capture, slot, rx)) {
                    Ok(handle) => camera_thread = Some(handle),
                    Err((e, mut capture)) => {
                        capture.close();
                        drop(shutdown);
                        let audio = join_capture(audio_thread, parked_audio, "Audio");
                        return Err((
                            e,
                            Resources {
                                pipeline,
                                audio,
                                camera: Some(capture),
                            },
                        ));
                    }
                }
            }
            Some(Err(capture)) => parked_camera = Some(capture),
            None => log::info!("No camera configured, motion reports missing frames"),
        }

        let ctx = TickContext {
            session_id,
            window_seconds: self.config.analysis_window_seconds,
            fusion: Arc::clone(&self.fusion),
            audio: Arc::clone(&self.audio),
            frames: Arc::clone(&self.frames),
            inbox: Arc::clone(&self.inbox),
            subscribers: Arc::clone(&self.subscribers),
        };
        let interval = self.config.tick_interval();
        let spawned = self.spawn_worker(pipeline, move |pipeline| run_worker(ctx, pipeline, shutdown_rx, interval));

        match spawned {
            Ok(worker) => Ok(RunningSession {
                shutdown,
                worker,
                audio: audio_thread,
                camera: camera_thread,
                parked_audio,
                parked_camera,
            }),
            Err((e, pipeline)) => {
                drop(shutdown);
                let audio = join_capture(audio_thread, parked_audio, "Audio");
                let camera = join_capture(camera_thread, parked_camera, "Camera");
                Err((
                    e,
                    Resources {
                        pipeline,
                        audio,
                        camera,
                    },
                ))
            }
        }
    }

    fn spawn_worker(
        &self,
        pipeline: ThreatPipeline,
        body: impl FnOnce(ThreatPipeline) -> ThreatPipeline + Send + 'static,
    ) -> Result<JoinHandle<Option<ThreatPipeline>>, (ThreatError, ThreatPipeline)> {
        #[cfg(test)]
        {
            if self.refuse_worker.load(Ordering::Acquire) {
                return Err((ThreatError::Worker("worker spawn refused".to_string()), pipeline));
            }
        }
        spawn_with("threatsense-worker", pipeline, body)
    }

    /// Stop the running session, release capture devices and reset fusion
    pub fn stop(&self) -> StopOutcome {
        let mut session = self.session.lock();
        let running = match std::mem::replace(&mut *session, Session::Transitioning) {
            Session::Running(running) => running,
            other => {
                *session = other;
                return StopOutcome::NotRunning;
            }
        };

        let RunningSession {
            shutdown,
            worker,
            audio,
            camera,
            parked_audio,
            parked_camera,
        } = running;
        drop(shutdown);

        let pipeline = join_capture(Some(worker), None, "Worker")
            .unwrap_or_else(|| ThreatPipeline::from_config(&self.config));
        let audio = join_capture(audio, parked_audio, "Audio");
        let camera = join_capture(camera, parked_camera, "Camera");

        self.fusion.reset();
        self.audio.clear();
        self.frames.clear();
        *session = Session::Idle(Resources {
            pipeline,
            audio,
            camera,
        });
        let session_id = self.session_id.lock().take();

        if let Some(id) = session_id {
            log::info!("Monitoring stopped (session {id})");
        }
        StopOutcome::Stopped
    }

    /// Current fused state with recent history
    pub fn snapshot(&self) -> ThreatSnapshot {
        let session_id = *self.session_id.lock();
        let mut snapshot = self.fusion.snapshot(self.config.snapshot_history);
        snapshot.session_id = session_id;
        snapshot.monitoring_active = session_id.is_some();
        snapshot
    }

    /// Rebuild the motion background model on the next tick
    pub fn reset_motion_background(&self) {
        self.inbox.reset_motion.store(true, Ordering::Release);
    }

    /// Append host-captured audio (normalized to [-1, 1])
    pub fn push_audio(&self, samples: &[f32]) {
        self.audio.push(samples);
    }

    /// Publish a host-captured frame, replacing any unread one
    pub fn push_frame(&self, frame: Frame) {
        self.frames.publish(frame);
    }

    /// Deliver a transcript fragment for the next tick
    pub fn submit_transcript(&self, transcript: Transcript) {
        *self.inbox.transcript.lock() = Some(transcript);
    }

    pub fn update_location(&self, location: LocationContext) {
        *self.inbox.location.lock() = location;
    }

    /// Receive state transitions. Events are dropped when the queue is full.
    pub fn subscribe(&self) -> Receiver<StateTransition> {
        let (tx, rx) = bounded(self.config.transition_queue);
        self.subscribers.lock().push(tx);
        rx
    }

    fn open_audio(&self, capture: Option<Box<dyn AudioCapture>>) -> Box<dyn AudioCapture> {
        let synthetic = || -> Box<dyn AudioCapture> {
            let mut source = SyntheticAudioSource::new(self.config.sample_rate, self.config.chunk_size);
            if let Err(e) = source.open() {
                log::warn!("{e}; synthetic audio may stay silent");
            }
            Box::new(source)
        };

        let Some(mut capture) = capture else {
            log::info!("Using synthetic audio");
            return synthetic();
        };

        match capture.open() {
            Ok(()) => {
                if capture.sample_rate() != self.config.sample_rate {
                    log::warn!(
                        "Audio device runs at {} Hz, analysis assumes {} Hz",
                        capture.sample_rate(),
                        self.config.sample_rate
                    );
                }
                capture
            }
            Err(e) => {
                log::warn!("{e}; falling back to synthetic audio");
                synthetic()
            }
        }
    }

    /// Open the camera, handing it back when it refuses
    fn open_camera(mut capture: Box<dyn FrameCapture>) -> Result<Box<dyn FrameCapture>, Box<dyn FrameCapture>> {
        match capture.open() {
            Ok(()) => Ok(capture),
            Err(e) => {
                log::warn!("{e}; motion analysis disabled for this session");
                Err(capture)
            }
        }
    }
}

impl Drop for ThreatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticFrameSource;
    use crate::classifier::ClassifierOutcome;
    use crate::features::FeatureVector;
    use crate::types::{EmotionSource, MotionPhase, ThreatState};
    use std::f32::consts::PI;
    use std::time::Instant;

    fn fast_config(audio_source: AudioSourceKind) -> MonitorConfig {
        MonitorConfig {
            tick_interval_ms: 20,
            audio_source,
            ..MonitorConfig::default()
        }
    }

    fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    fn scream() -> Vec<f32> {
        (0..16_000)
            .map(|i| 0.8 * (2.0 * PI * 3_000.0 * i as f32 / 16_000.0).sin())
            .collect()
    }

    /// Records open/close calls and produces silence
    struct RecordingAudio {
        opened: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
        fail_open: bool,
    }

    impl AudioCapture for RecordingAudio {
        fn open(&mut self) -> Result<(), ThreatError> {
            if self.fail_open {
                return Err(ThreatError::Capture("no microphone".to_string()));
            }
            self.opened.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn read_chunk(&mut self) -> Option<Vec<f32>> {
            thread::sleep(Duration::from_millis(5));
            Some(vec![0.0; 80])
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn sample_rate(&self) -> u32 {
            16_000
        }
    }

    struct PanickingClassifier;

    impl EmotionClassifier for PanickingClassifier {
        fn name(&self) -> &str {
            "panicking"
        }

        fn sequence_len(&self) -> usize {
            1
        }

        fn classify(&mut self, _sequence: &[FeatureVector]) -> ClassifierOutcome {
            panic!("classifier exploded");
        }
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let monitor = ThreatMonitor::new(fast_config(AudioSourceKind::Synthetic)).unwrap();
        assert!(!monitor.is_active());
        assert_eq!(monitor.stop(), StopOutcome::NotRunning);

        let started = monitor.start().unwrap();
        assert!(matches!(started, StartOutcome::Started { .. }));
        assert!(monitor.is_active());

        let again = monitor.start().unwrap();
        assert_eq!(again, StartOutcome::AlreadyRunning { session_id: started.session_id() });
        assert_eq!(again.as_str(), "already_running");

        assert!(wait_for(Duration::from_secs(2), || !monitor.snapshot().recent_history.is_empty()));
        let snapshot = monitor.snapshot();
        assert!(snapshot.monitoring_active);
        assert_eq!(snapshot.session_id, Some(started.session_id()));

        assert_eq!(monitor.stop(), StopOutcome::Stopped);
        assert_eq!(monitor.stop(), StopOutcome::NotRunning);

        let snapshot = monitor.snapshot();
        assert!(!snapshot.monitoring_active);
        assert_eq!(snapshot.state, ThreatState::Safe);
        assert!(snapshot.recent_history.is_empty());
    }

    #[test]
    fn test_restart_gets_new_session() {
        let monitor = ThreatMonitor::new(fast_config(AudioSourceKind::External)).unwrap();
        let first = monitor.start().unwrap().session_id();
        monitor.stop();
        let second = monitor.start().unwrap().session_id();
        assert_ne!(first, second);
        monitor.stop();
    }

    #[test]
    fn test_external_audio_and_transcript_raise_alert() {
        let monitor = ThreatMonitor::new(fast_config(AudioSourceKind::External)).unwrap();
        let transitions = monitor.subscribe();
        monitor.start().unwrap();

        monitor.push_audio(&scream());
        monitor.submit_transcript(Transcript {
            text: "help, stop it".to_string(),
            confidence: 0.9,
        });

        assert!(wait_for(Duration::from_secs(3), || monitor.snapshot().latch_active));
        let snapshot = monitor.snapshot();
        assert!(snapshot.score >= 0.70);
        assert!(snapshot.state.is_alert());
        assert_eq!(snapshot.speech_source, Some(EmotionSource::Heuristic));
        assert_eq!(snapshot.motion_phase, Some(MotionPhase::Missing));

        let event = transitions.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(Some(event.session_id), snapshot.session_id);
        assert_eq!(event.from, ThreatState::Safe);
        assert!(event.to.is_alert());

        monitor.stop();
    }

    #[test]
    fn test_stop_releases_capture_devices() {
        let opened = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let monitor = ThreatMonitor::builder()
            .config(fast_config(AudioSourceKind::Synthetic))
            .audio_capture(Box::new(RecordingAudio {
                opened: Arc::clone(&opened),
                closed: Arc::clone(&closed),
                fail_open: false,
            }))
            .frame_capture(Box::new(SyntheticFrameSource::new(32, 24, 50.0)))
            .build()
            .unwrap();

        monitor.start().unwrap();
        assert!(opened.load(Ordering::SeqCst));
        assert!(!closed.load(Ordering::SeqCst));

        assert_eq!(monitor.stop(), StopOutcome::Stopped);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failed_microphone_falls_back_to_synthetic() {
        let monitor = ThreatMonitor::builder()
            .config(fast_config(AudioSourceKind::Synthetic))
            .audio_capture(Box::new(RecordingAudio {
                opened: Arc::new(AtomicBool::new(false)),
                closed: Arc::new(AtomicBool::new(false)),
                fail_open: true,
            }))
            .build()
            .unwrap();

        assert!(matches!(monitor.start().unwrap(), StartOutcome::Started { .. }));
        assert!(wait_for(Duration::from_secs(2), || monitor.audio.len() > 0));
        monitor.stop();
    }

    #[test]
    fn test_panicking_classifier_still_publishes_state() {
        let monitor = ThreatMonitor::builder()
            .config(fast_config(AudioSourceKind::External))
            .classifier(Box::new(PanickingClassifier))
            .build()
            .unwrap();

        monitor.start().unwrap();
        monitor.push_audio(&scream());

        assert!(wait_for(Duration::from_secs(2), || monitor.snapshot().recent_history.len() >= 3));
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.speech_source, Some(EmotionSource::Heuristic));
        assert!(snapshot.score > 0.0);
        assert!(monitor.is_active());
        assert_eq!(monitor.stop(), StopOutcome::Stopped);
    }

    #[test]
    fn test_second_start_keeps_running_state() {
        let monitor = ThreatMonitor::new(fast_config(AudioSourceKind::External)).unwrap();
        let first = monitor.start().unwrap();

        monitor.push_audio(&scream());
        monitor.submit_transcript(Transcript {
            text: "help, stop it".to_string(),
            confidence: 0.9,
        });
        assert!(wait_for(Duration::from_secs(3), || monitor.snapshot().latch_active));
        let before = monitor.snapshot();
        assert!(before.score >= 0.70);

        let again = monitor.start().unwrap();
        assert_eq!(again, StartOutcome::AlreadyRunning { session_id: first.session_id() });

        // A reset would drop the score to 0, clear the latch and empty the history
        let after = monitor.snapshot();
        assert!(after.latch_active);
        assert!(after.score >= 0.70);
        assert!(after.recent_history.len() >= before.recent_history.len());
        assert_eq!(after.session_id, Some(first.session_id()));

        monitor.stop();
    }

    #[test]
    fn test_failed_launch_restores_devices_and_classifier() {
        let opened = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let monitor = ThreatMonitor::builder()
            .config(fast_config(AudioSourceKind::Synthetic))
            .audio_capture(Box::new(RecordingAudio {
                opened: Arc::clone(&opened),
                closed: Arc::clone(&closed),
                fail_open: false,
            }))
            .classifier(Box::new(PanickingClassifier))
            .build()
            .unwrap();

        monitor.refuse_worker.store(true, Ordering::Release);
        assert!(matches!(monitor.start(), Err(ThreatError::Worker(_))));
        assert!(!monitor.is_active());
        // The audio thread was joined, which closes the device
        assert!(opened.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));

        match &*monitor.session.lock() {
            Session::Idle(resources) => {
                assert!(resources.audio.is_some());
                assert_eq!(resources.pipeline.speech().classifier_name(), "panicking");
            }
            _ => panic!("expected an idle session"),
        }

        monitor.refuse_worker.store(false, Ordering::Release);
        opened.store(false, Ordering::SeqCst);
        closed.store(false, Ordering::SeqCst);
        assert!(matches!(monitor.start().unwrap(), StartOutcome::Started { .. }));
        assert!(opened.load(Ordering::SeqCst));

        assert_eq!(monitor.stop(), StopOutcome::Stopped);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_reset_motion_background_is_consumed() {
        let monitor = ThreatMonitor::new(fast_config(AudioSourceKind::External)).unwrap();
        monitor.start().unwrap();
        monitor.reset_motion_background();
        assert!(wait_for(Duration::from_secs(2), || !monitor.inbox.reset_motion.load(Ordering::Acquire)));
        monitor.stop();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MonitorConfig {
            tick_interval_ms: 0,
            ..MonitorConfig::default()
        };
        assert!(matches!(ThreatMonitor::new(config), Err(ThreatError::InvalidConfig(_))));
    }
}
