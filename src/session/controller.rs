//! Session state machine and lifecycle owner.
//!
//! The controller is the only writer of session state. It acquires the audio
//! contexts, opens the channel, wires capture to the channel once the channel
//! opens, feeds inbound speech to the [`PlaybackScheduler`], and funnels
//! stop, close, and error into one idempotent teardown.

use super::capture_encoder::{CaptureEncoder, CaptureStats};
use super::messages;
use super::scheduler::PlaybackScheduler;
use super::{SessionState, SessionStatus};
use crate::audio::{
    AudioBackend, AudioFrame, InputContext, LevelMeter, OutputContext, PlaybackEvent,
};
use crate::config::SessionConfig;
use crate::credentials::CredentialGate;
use crate::error::{Result, SessionError};
use crate::transport::{
    ChannelConnector, ChannelEvent, ChannelFailure, ErrorClassifier, FailureClass, OpenRequest,
    TransportChannel,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handle::{SessionCommand, SessionHandle};

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Hardware acquired; the channel is opening.
    Connecting,
    /// The channel opened and audio is flowing.
    Connected,
    /// No credential: nothing was acquired.
    CredentialRequired,
    /// Stopped before the channel opened.
    Cancelled,
}

/// Anything the live session reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// From the transport channel.
    Channel(ChannelEvent),
    /// From the output context.
    Playback(PlaybackEvent),
}

/// Resources of one session. Created by `start`, consumed by teardown.
struct Session {
    id: Uuid,
    /// Read by the capture callback on the audio thread.
    active: Arc<AtomicBool>,
    input: Box<dyn InputContext>,
    output: Box<dyn OutputContext>,
    channel: TransportChannel,
    playback: mpsc::UnboundedReceiver<PlaybackEvent>,
    scheduler: PlaybackScheduler,
    capture_stats: Option<Arc<CaptureStats>>,
}

/// Owns the session lifecycle. One session at a time.
pub struct SessionController {
    config: SessionConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn ChannelConnector>,
    gate: Arc<dyn CredentialGate>,
    classifier: ErrorClassifier,
    status: watch::Sender<SessionStatus>,
    input_level: LevelMeter,
    output_level: LevelMeter,
    session: Option<Session>,
    pending_start: Option<oneshot::Sender<Result<StartOutcome>>>,
}

impl SessionController {
    /// Create an idle controller. Publishes whether a credential is needed.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn ChannelConnector>,
        gate: Arc<dyn CredentialGate>,
    ) -> Self {
        let classifier = ErrorClassifier::from_config(&config.credentials);
        let (status, _) = watch::channel(SessionStatus {
            needs_credential: !gate.has_credential(),
            ..SessionStatus::default()
        });
        Self {
            config,
            backend,
            connector,
            gate,
            classifier,
            status,
            input_level: LevelMeter::new(),
            output_level: LevelMeter::new(),
            session: None,
            pending_start: None,
        }
    }

    /// Replace the failure classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Watch status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Microphone level tap.
    #[must_use]
    pub fn input_level(&self) -> LevelMeter {
        self.input_level.clone()
    }

    /// Speaker level tap.
    #[must_use]
    pub fn output_level(&self) -> LevelMeter {
        self.output_level.clone()
    }

    /// Begin a session.
    ///
    /// Returns [`StartOutcome::CredentialRequired`] without touching hardware
    /// if the gate has no credential. Otherwise acquires both audio contexts,
    /// starts opening the channel, and returns [`StartOutcome::Connecting`];
    /// the open arrives later as a channel event.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] unless disconnected, or the
    /// backend's error if hardware could not be acquired. Either way nothing
    /// stays acquired.
    pub fn start(&mut self) -> Result<StartOutcome> {
        let state = self.state();
        if state != SessionState::Disconnected || self.session.is_some() {
            return Err(SessionError::InvalidTransition {
                action: "start",
                state,
            });
        }

        self.status.send_modify(|s| s.error_message = None);

        if !self.gate.has_credential() {
            info!("start refused: no credential available");
            self.status.send_modify(|s| s.needs_credential = true);
            return Ok(StartOutcome::CredentialRequired);
        }

        let id = Uuid::new_v4();
        info!(session_id = %id, "starting voice session");
        self.set_state(SessionState::Connecting);

        let mut input = match self
            .backend
            .open_input(&self.config.audio, self.input_level.clone())
        {
            Ok(input) => input,
            Err(e) => return Err(self.abort_start(id, e)),
        };

        let (playback_tx, playback) = mpsc::unbounded_channel();
        let output = match self.backend.open_output(
            &self.config.audio,
            self.output_level.clone(),
            playback_tx,
        ) {
            Ok(output) => output,
            Err(e) => {
                if let Err(close_err) = input.close() {
                    warn!(session_id = %id, "failed to release input after aborted start: {close_err}");
                }
                return Err(self.abort_start(id, e));
            }
        };

        let request = OpenRequest::from_config(&self.config, self.gate.api_key());
        let channel = self.connector.open(request);

        self.session = Some(Session {
            id,
            active: Arc::new(AtomicBool::new(false)),
            input,
            output,
            channel,
            playback,
            scheduler: PlaybackScheduler::new(),
            capture_stats: None,
        });
        Ok(StartOutcome::Connecting)
    }

    /// End the session, if any. Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        if let Some(session) = &self.session {
            info!(session_id = %session.id, "stop requested");
        }
        self.resolve_start(Ok(StartOutcome::Cancelled));
        self.teardown();
    }

    /// Ask the gate for a credential and assume it worked.
    pub fn select_credential(&mut self) {
        self.gate.request_credential_selection();
        self.status.send_modify(|s| s.needs_credential = false);
    }

    /// Wait for the next event of the live session. Never resolves while no
    /// session is live.
    pub async fn next_event(&mut self) -> SessionEvent {
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };
        tokio::select! {
            event = session.channel.recv() => {
                SessionEvent::Channel(event.unwrap_or(ChannelEvent::Closed))
            }
            Some(event) = session.playback.recv() => SessionEvent::Playback(event),
        }
    }

    /// Handle every event that is already waiting. Returns how many were handled.
    pub fn pump_ready(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.try_next_event() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn try_next_event(&mut self) -> Option<SessionEvent> {
        let session = self.session.as_mut()?;
        if let Ok(event) = session.playback.try_recv() {
            return Some(SessionEvent::Playback(event));
        }
        session.channel.try_recv().map(SessionEvent::Channel)
    }

    /// React to one event. Events with no live session are discarded.
    pub fn handle_event(&mut self, event: SessionEvent) {
        if self.session.is_none() {
            debug!(?event, "event without a live session discarded");
            return;
        }
        match event {
            SessionEvent::Channel(ChannelEvent::Opened) => self.on_opened(),
            SessionEvent::Channel(ChannelEvent::AudioChunk(chunk)) => self.on_audio_chunk(&chunk),
            SessionEvent::Channel(ChannelEvent::Interrupted) => self.on_interrupted(),
            SessionEvent::Channel(ChannelEvent::TurnComplete) => debug!("reply turn complete"),
            SessionEvent::Channel(ChannelEvent::Error(failure)) => self.on_error(&failure),
            SessionEvent::Channel(ChannelEvent::Closed) => self.on_closed(),
            SessionEvent::Playback(PlaybackEvent::FrameEnded(id)) => {
                if let Some(session) = self.session.as_mut() {
                    session.scheduler.complete(id);
                    let speaking = session.scheduler.is_speaking();
                    self.set_speaking(speaking);
                }
            }
        }
    }

    /// Drive the controller from a command channel until every sender is
    /// gone, then tear down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = self.next_event() => self.handle_event(event),
            }
        }
        debug!("session controller shutting down");
        self.resolve_start(Err(SessionError::ControllerGone));
        self.teardown();
    }

    /// Run the controller on the tokio runtime and return a handle to it.
    #[must_use]
    pub fn spawn(self) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let handle = SessionHandle::new(
            commands_tx,
            self.subscribe(),
            self.input_level(),
            self.output_level(),
        );
        tokio::spawn(self.run(commands_rx));
        handle
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start(reply) => match self.start() {
                Ok(StartOutcome::Connecting) => {
                    self.pending_start = Some(reply);
                    // The open may already be waiting.
                    self.pump_ready();
                }
                other => {
                    let _ = reply.send(other);
                }
            },
            SessionCommand::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            SessionCommand::SelectCredential(reply) => {
                self.select_credential();
                let _ = reply.send(());
            }
        }
    }

    fn on_opened(&mut self) {
        if self.state() != SessionState::Connecting {
            debug!("open notice outside connecting state ignored");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.active.store(true, Ordering::Release);
        let encoder = CaptureEncoder::new(
            Arc::clone(&session.active),
            session.channel.sender(),
            self.config.audio.input_sample_rate,
        );
        session.capture_stats = Some(encoder.stats());
        session.input.connect(encoder.into_processor());
        info!(session_id = %session.id, "voice session connected");

        self.set_state(SessionState::Connected);
        self.resolve_start(Ok(StartOutcome::Connected));
    }

    fn on_audio_chunk(&mut self, chunk: &str) {
        let sample_rate = self.config.audio.output_sample_rate;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.active.load(Ordering::Acquire) {
            debug!("audio chunk before open dropped");
            return;
        }

        let frame = match AudioFrame::from_transport_text(chunk, sample_rate) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id = %session.id, "dropping malformed audio chunk: {e}");
                return;
            }
        };

        let now = session.output.current_time();
        let duration = frame.duration_secs();
        let start = session
            .scheduler
            .schedule_frame(frame, now, session.output.as_mut());
        debug!(start, duration, "reply frame scheduled");

        let speaking = session.scheduler.is_speaking();
        self.set_speaking(speaking);
    }

    fn on_interrupted(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.active.load(Ordering::Acquire) {
            return;
        }
        let stopped = session.scheduler.flush(session.output.as_mut());
        info!(session_id = %session.id, stopped, "reply interrupted");
        self.set_speaking(false);
    }

    fn on_error(&mut self, failure: &ChannelFailure) {
        let class = self.classifier.classify(failure);
        if let Some(session) = &self.session {
            warn!(session_id = %session.id, ?class, "voice channel error: {failure}");
        }

        let credential = class == FailureClass::Credential;
        self.status.send_modify(|s| {
            s.state = SessionState::Error;
            s.error_message = Some(
                if credential {
                    messages::CREDENTIAL_ERROR
                } else {
                    messages::NETWORK_ERROR
                }
                .to_owned(),
            );
            if credential {
                s.needs_credential = true;
            }
        });

        let error = if credential {
            SessionError::CredentialRejected(failure.to_string())
        } else {
            SessionError::ChannelOpen(failure.to_string())
        };
        self.resolve_start(Err(error));
        self.teardown();
    }

    fn on_closed(&mut self) {
        if let Some(session) = &self.session {
            info!(session_id = %session.id, "voice channel closed");
        }
        self.resolve_start(Err(SessionError::ChannelOpen(
            "channel closed before opening".into(),
        )));
        self.teardown();
    }

    /// Release everything the session holds. Idempotent; every step is
    /// attempted even if an earlier one fails.
    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.active.store(false, Ordering::Release);

            let stopped = session.scheduler.flush(session.output.as_mut());
            session.input.disconnect();
            if let Err(e) = session.input.close() {
                warn!(session_id = %session.id, "failed to close audio input: {e}");
            }
            if let Err(e) = session.output.close() {
                warn!(session_id = %session.id, "failed to close audio output: {e}");
            }
            session.channel.close();

            let (sent, dropped) = session
                .capture_stats
                .as_ref()
                .map_or((0, 0), |s| (s.sent(), s.dropped()));
            info!(
                session_id = %session.id,
                stopped,
                blocks_sent = sent,
                blocks_dropped = dropped,
                "voice session ended"
            );
        }

        self.status.send_if_modified(|s| {
            let changed = s.state != SessionState::Disconnected || s.is_speaking;
            s.state = SessionState::Disconnected;
            s.is_speaking = false;
            changed
        });
    }

    fn abort_start(&mut self, id: Uuid, error: SessionError) -> SessionError {
        warn!(session_id = %id, "could not acquire audio hardware: {error}");
        self.status.send_modify(|s| {
            s.state = SessionState::Disconnected;
            s.is_speaking = false;
            s.error_message = Some(messages::HARDWARE_ERROR.to_owned());
        });
        error
    }

    fn resolve_start(&mut self, outcome: Result<StartOutcome>) {
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(outcome);
        }
    }

    fn set_state(&self, state: SessionState) {
        self.status.send_if_modified(|s| {
            let changed = s.state != state;
            s.state = state;
            changed
        });
    }

    fn set_speaking(&self, speaking: bool) {
        self.status.send_if_modified(|s| {
            let changed = s.is_speaking != speaking;
            s.is_speaking = speaking;
            changed
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::audio::{AudioFrame, BlockProcessor, FrameId, FrameSink};
    use crate::codec;
    use crate::config::AudioConfig;
    use crate::transport::{ChannelState, LoopbackConnector, LoopbackPeer};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Hardware {
        now: f64,
        inputs_opened: usize,
        inputs_closed: usize,
        outputs_opened: usize,
        outputs_closed: usize,
        processor: Option<BlockProcessor>,
        started: Vec<(FrameId, f64, f64)>,
        stopped: Vec<FrameId>,
        events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
        fail_input: bool,
        fail_output: bool,
    }

    type Shared = Arc<Mutex<Hardware>>;

    fn lock(hw: &Shared) -> std::sync::MutexGuard<'_, Hardware> {
        hw.lock().unwrap()
    }

    struct FakeBackend(Shared);

    struct FakeInput(Shared);

    struct FakeOutput(Shared);

    impl AudioBackend for FakeBackend {
        fn open_input(
            &self,
            _config: &AudioConfig,
            _level: LevelMeter,
        ) -> Result<Box<dyn InputContext>> {
            let mut hw = lock(&self.0);
            if hw.fail_input {
                return Err(SessionError::HardwareAcquisition("no microphone".into()));
            }
            hw.inputs_opened += 1;
            Ok(Box::new(FakeInput(Arc::clone(&self.0))))
        }

        fn open_output(
            &self,
            _config: &AudioConfig,
            _level: LevelMeter,
            events: mpsc::UnboundedSender<PlaybackEvent>,
        ) -> Result<Box<dyn OutputContext>> {
            let mut hw = lock(&self.0);
            if hw.fail_output {
                return Err(SessionError::HardwareAcquisition("no speakers".into()));
            }
            hw.outputs_opened += 1;
            hw.events = Some(events);
            Ok(Box::new(FakeOutput(Arc::clone(&self.0))))
        }
    }

    impl InputContext for FakeInput {
        fn connect(&mut self, processor: BlockProcessor) {
            lock(&self.0).processor = Some(processor);
        }

        fn disconnect(&mut self) {
            lock(&self.0).processor = None;
        }

        fn close(&mut self) -> Result<()> {
            let mut hw = lock(&self.0);
            hw.processor = None;
            hw.inputs_closed += 1;
            Ok(())
        }
    }

    impl FrameSink for FakeOutput {
        fn start_frame(&mut self, id: FrameId, frame: AudioFrame, at: f64) {
            lock(&self.0).started.push((id, at, frame.duration_secs()));
        }

        fn stop_frame(&mut self, id: FrameId) {
            lock(&self.0).stopped.push(id);
        }
    }

    impl OutputContext for FakeOutput {
        fn current_time(&self) -> f64 {
            lock(&self.0).now
        }

        fn close(&mut self) -> Result<()> {
            lock(&self.0).outputs_closed += 1;
            Err(SessionError::Audio("device vanished".into()))
        }
    }

    #[derive(Default)]
    struct FakeGate {
        missing: AtomicBool,
        selections: AtomicUsize,
    }

    impl CredentialGate for FakeGate {
        fn has_credential(&self) -> bool {
            !self.missing.load(Ordering::SeqCst)
        }

        fn request_credential_selection(&self) {
            self.selections.fetch_add(1, Ordering::SeqCst);
            self.missing.store(false, Ordering::SeqCst);
        }

        fn api_key(&self) -> Option<String> {
            self.has_credential().then(|| "test-key".to_owned())
        }
    }

    struct Harness {
        controller: SessionController,
        hw: Shared,
        peers: mpsc::UnboundedReceiver<LoopbackPeer>,
        gate: Arc<FakeGate>,
    }

    impl Harness {
        fn new() -> Self {
            let hw: Shared = Arc::default();
            let (connector, peers) = LoopbackConnector::pair();
            let gate = Arc::new(FakeGate::default());
            let controller = SessionController::new(
                SessionConfig::default(),
                Arc::new(FakeBackend(Arc::clone(&hw))),
                Arc::new(connector),
                Arc::clone(&gate) as Arc<dyn CredentialGate>,
            );
            Self {
                controller,
                hw,
                peers,
                gate,
            }
        }

        /// Start and accept, returning the service-side peer.
        fn connect(&mut self) -> LoopbackPeer {
            assert_eq!(self.controller.start().unwrap(), StartOutcome::Connecting);
            let mut peer = self.peers.try_recv().unwrap();
            peer.accept();
            self.controller.pump_ready();
            assert_eq!(self.controller.state(), SessionState::Connected);
            peer
        }

        fn feed_block(&self, samples: &[f32]) -> bool {
            let mut hw = lock(&self.hw);
            match hw.processor.as_mut() {
                Some(process) => {
                    process(samples);
                    true
                }
                None => false,
            }
        }

        fn starts(&self) -> Vec<f64> {
            lock(&self.hw).started.iter().map(|(_, at, _)| *at).collect()
        }

        fn cursor(&self) -> f64 {
            self.controller
                .session
                .as_ref()
                .map_or(0.0, |s| s.scheduler.cursor())
        }

        fn active_frames(&self) -> usize {
            self.controller
                .session
                .as_ref()
                .map_or(0, |s| s.scheduler.active_len())
        }
    }

    fn chunk(secs: f64) -> String {
        let samples = vec![0.1f32; (secs * 24_000.0).round() as usize];
        codec::encode_bytes(&codec::float_to_pcm16(&samples))
    }

    fn close_to(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn initial_status_reflects_credential() {
        let harness = Harness::new();
        assert!(!harness.controller.status().needs_credential);

        let hw: Shared = Arc::default();
        let (connector, _peers) = LoopbackConnector::pair();
        let gate = Arc::new(FakeGate::default());
        gate.missing.store(true, Ordering::SeqCst);
        let controller = SessionController::new(
            SessionConfig::default(),
            Arc::new(FakeBackend(hw)),
            Arc::new(connector),
            gate,
        );
        assert!(controller.status().needs_credential);
    }

    #[test]
    fn missing_credential_blocks_start_without_hardware() {
        let mut h = Harness::new();
        h.gate.missing.store(true, Ordering::SeqCst);

        assert_eq!(
            h.controller.start().unwrap(),
            StartOutcome::CredentialRequired
        );
        let status = h.controller.status();
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(status.needs_credential);
        assert_eq!(lock(&h.hw).inputs_opened, 0);
        assert_eq!(lock(&h.hw).outputs_opened, 0);
        assert!(h.peers.try_recv().is_err());
    }

    #[test]
    fn select_credential_clears_the_prompt() {
        let mut h = Harness::new();
        h.gate.missing.store(true, Ordering::SeqCst);
        h.controller.start().unwrap();
        h.controller.select_credential();
        assert_eq!(h.gate.selections.load(Ordering::SeqCst), 1);
        assert!(!h.controller.status().needs_credential);
        assert_eq!(h.controller.start().unwrap(), StartOutcome::Connecting);
    }

    #[test]
    fn open_request_carries_persona_and_key() {
        let mut h = Harness::new();
        h.controller.start().unwrap();
        let peer = h.peers.try_recv().unwrap();
        assert_eq!(peer.request().api_key.as_deref(), Some("test-key"));
        assert_eq!(peer.request().voice_name, "Kore");
        assert!(!peer.request().instructions.is_empty());
        assert_eq!(h.controller.state(), SessionState::Connecting);
        assert_eq!(lock(&h.hw).inputs_opened, 1);
        assert_eq!(lock(&h.hw).outputs_opened, 1);
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut h = Harness::new();
        h.controller.start().unwrap();
        assert!(matches!(
            h.controller.start(),
            Err(SessionError::InvalidTransition {
                action: "start",
                state: SessionState::Connecting
            })
        ));
        assert_eq!(lock(&h.hw).inputs_opened, 1);
    }

    #[test]
    fn capture_is_wired_only_after_open() {
        let mut h = Harness::new();
        h.controller.start().unwrap();
        let mut peer = h.peers.try_recv().unwrap();
        assert!(!h.feed_block(&[0.2; 8]));

        peer.accept();
        h.controller.pump_ready();
        assert!(h.feed_block(&[0.2; 8]));
        let blob = peer.try_recv().unwrap();
        assert_eq!(blob.format().mime_type(), "audio/pcm;rate=16000");
        assert_eq!(blob.decode_samples().unwrap().len(), 8);
    }

    #[test]
    fn chunks_schedule_back_to_back() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        for secs in [0.5, 0.3, 0.4] {
            peer.send_audio(chunk(secs));
        }
        h.controller.pump_ready();

        let starts = h.starts();
        assert_eq!(starts.len(), 3);
        assert!(close_to(starts[0], 0.0));
        assert!(close_to(starts[1], 0.5));
        assert!(close_to(starts[2], 0.8));
        assert!(close_to(h.cursor(), 1.2));
        assert!(h.controller.status().is_speaking);
    }

    #[test]
    fn interruption_flushes_before_next_chunk() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        peer.send_audio(chunk(0.5));
        peer.send_audio(chunk(0.3));
        h.controller.pump_ready();

        peer.interrupt();
        h.controller.pump_ready();
        assert_eq!(h.active_frames(), 0);
        assert_eq!(h.cursor(), 0.0);
        assert!(!h.controller.status().is_speaking);
        assert_eq!(lock(&h.hw).stopped, vec![FrameId(0), FrameId(1)]);

        lock(&h.hw).now = 0.35;
        peer.send_audio(chunk(0.4));
        h.controller.pump_ready();
        let starts = h.starts();
        assert!(close_to(starts[2], 0.35));
        assert!(close_to(h.cursor(), 0.75));
    }

    #[test]
    fn frame_completion_clears_speaking() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        peer.send_audio(chunk(0.1));
        peer.send_audio(chunk(0.1));
        h.controller.pump_ready();

        let events = lock(&h.hw).events.clone().unwrap();
        events.send(PlaybackEvent::FrameEnded(FrameId(0))).unwrap();
        h.controller.pump_ready();
        assert!(h.controller.status().is_speaking);

        events.send(PlaybackEvent::FrameEnded(FrameId(1))).unwrap();
        h.controller.pump_ready();
        assert!(!h.controller.status().is_speaking);
    }

    #[test]
    fn malformed_chunk_is_dropped_and_session_survives() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        peer.send_audio("!!not base64!!");
        peer.send_audio(codec::encode_bytes(&[1, 2, 3]));
        peer.send_audio(chunk(0.2));
        h.controller.pump_ready();

        assert_eq!(h.controller.state(), SessionState::Connected);
        assert_eq!(h.starts().len(), 1);
        assert!(h.controller.status().error_message.is_none());
    }

    #[test]
    fn stop_releases_everything_and_is_idempotent() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        peer.send_audio(chunk(0.5));
        h.controller.pump_ready();

        h.controller.stop();
        h.controller.stop();

        let status = h.controller.status();
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(!status.is_speaking);
        assert!(h.controller.session.is_none());
        let hw = lock(&h.hw);
        assert_eq!(hw.inputs_closed, 1);
        assert_eq!(hw.outputs_closed, 1);
        assert!(hw.processor.is_none());
        assert_eq!(hw.stopped, vec![FrameId(0)]);
        drop(hw);
        assert!(peer.is_cancelled());
        assert_eq!(peer.state(), ChannelState::Closed);
    }

    #[test]
    fn stop_while_connecting_releases_hardware() {
        let mut h = Harness::new();
        h.controller.start().unwrap();
        let mut peer = h.peers.try_recv().unwrap();
        h.controller.stop();

        assert_eq!(h.controller.state(), SessionState::Disconnected);
        assert_eq!(lock(&h.hw).inputs_closed, 1);
        assert_eq!(lock(&h.hw).outputs_closed, 1);
        assert!(!peer.accept());
    }

    #[test]
    fn stop_from_idle_is_harmless() {
        let mut h = Harness::new();
        h.controller.stop();
        assert_eq!(h.controller.state(), SessionState::Disconnected);
        assert_eq!(lock(&h.hw).inputs_closed, 0);
    }

    #[test]
    fn capture_after_stop_sends_nothing() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        let active = Arc::clone(&h.controller.session.as_ref().unwrap().active);
        let sender = h.controller.session.as_ref().unwrap().channel.sender();
        let encoder = CaptureEncoder::new(active, sender, 16_000);

        h.controller.stop();
        for _ in 0..5 {
            assert_ne!(encoder.on_block(&[0.3; 16]), crate::session::Submission::Sent);
        }
        assert_eq!(encoder.stats().sent(), 0);
        assert!(peer.try_recv().is_none());
    }

    #[test]
    fn server_close_tears_down() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        peer.close();
        h.controller.pump_ready();
        assert_eq!(h.controller.state(), SessionState::Disconnected);
        assert!(h.controller.status().error_message.is_none());
        assert_eq!(lock(&h.hw).inputs_closed, 1);
    }

    #[test]
    fn network_error_sets_message_and_tears_down() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        let mut status = h.controller.subscribe();
        peer.fail(ChannelFailure::Transport("connection reset".into()));
        h.controller.pump_ready();

        let current = status.borrow_and_update().clone();
        assert_eq!(current.state, SessionState::Disconnected);
        assert_eq!(current.error_message.as_deref(), Some(messages::NETWORK_ERROR));
        assert!(!current.needs_credential);
        assert_eq!(lock(&h.hw).outputs_closed, 1);
    }

    #[test]
    fn credential_error_requests_new_key() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        peer.fail(ChannelFailure::Rejected {
            code: 1008,
            reason: "Requested entity was not found.".into(),
        });
        h.controller.pump_ready();

        let status = h.controller.status();
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(status.needs_credential);
        assert_eq!(status.error_message.as_deref(), Some(messages::CREDENTIAL_ERROR));
    }

    #[test]
    fn open_failure_takes_the_error_path() {
        let mut h = Harness::new();
        h.controller.start().unwrap();
        let mut peer = h.peers.try_recv().unwrap();
        peer.fail(ChannelFailure::Connect {
            status: None,
            detail: "connection refused".into(),
        });
        h.controller.pump_ready();
        assert_eq!(h.controller.state(), SessionState::Disconnected);
        assert_eq!(lock(&h.hw).inputs_closed, 1);
        assert!(h.controller.status().error_message.is_some());
    }

    #[test]
    fn start_clears_previous_error() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        peer.fail(ChannelFailure::Transport("reset".into()));
        h.controller.pump_ready();
        assert!(h.controller.status().error_message.is_some());

        h.controller.start().unwrap();
        assert!(h.controller.status().error_message.is_none());
    }

    #[test]
    fn input_failure_aborts_start() {
        let mut h = Harness::new();
        lock(&h.hw).fail_input = true;
        assert!(matches!(
            h.controller.start(),
            Err(SessionError::HardwareAcquisition(_))
        ));
        let status = h.controller.status();
        assert_eq!(status.state, SessionState::Disconnected);
        assert_eq!(status.error_message.as_deref(), Some(messages::HARDWARE_ERROR));
        assert!(h.peers.try_recv().is_err());
    }

    #[test]
    fn output_failure_releases_acquired_input() {
        let mut h = Harness::new();
        lock(&h.hw).fail_output = true;
        assert!(h.controller.start().is_err());
        assert_eq!(lock(&h.hw).inputs_opened, 1);
        assert_eq!(lock(&h.hw).inputs_closed, 1);
        assert!(h.peers.try_recv().is_err());
        assert_eq!(h.controller.state(), SessionState::Disconnected);
    }

    #[test]
    fn events_from_an_old_session_are_ignored() {
        let mut h = Harness::new();
        let mut first = h.connect();
        h.controller.stop();

        first.send_audio(chunk(0.2));
        let mut second = h.connect();
        h.controller.pump_ready();
        assert!(h.starts().is_empty());

        second.send_audio(chunk(0.2));
        h.controller.pump_ready();
        assert_eq!(h.starts().len(), 1);
    }

    #[test]
    fn each_session_starts_with_a_fresh_cursor() {
        let mut h = Harness::new();
        let mut peer = h.connect();
        peer.send_audio(chunk(1.0));
        h.controller.pump_ready();
        assert!(close_to(h.cursor(), 1.0));
        h.controller.stop();

        lock(&h.hw).now = 0.25;
        let mut peer = h.connect();
        peer.send_audio(chunk(0.5));
        h.controller.pump_ready();
        assert!(close_to(*h.starts().last().unwrap(), 0.25));
    }

    #[test]
    fn audio_before_open_is_not_played() {
        let mut h = Harness::new();
        h.controller.start().unwrap();
        let mut peer = h.peers.try_recv().unwrap();
        peer.send_audio(chunk(0.2));
        h.controller.pump_ready();
        assert!(h.starts().is_empty());
        assert_eq!(h.controller.state(), SessionState::Connecting);
    }
}
