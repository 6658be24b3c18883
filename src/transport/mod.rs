//! Bidirectional channel to the remote voice service.
//!
//! A [`TransportChannel`] is the session's view of one connection: a
//! [`ChannelSender`] for outbound audio and an ordered stream of
//! [`ChannelEvent`]s. The connection itself is driven by whoever holds the
//! matching [`LinkEnd`]: the WebSocket task in [`live`] or a test peer in
//! [`loopback`].
//!
//! Lifecycle: `Idle -> Opening -> Open -> Closed`. `Opened` is delivered at
//! most once, and exactly one of `Error`/`Closed` ends the event stream.

pub mod classify;
pub mod live;
pub mod loopback;
pub mod protocol;

pub use classify::{ErrorClassifier, FailureClass, FailurePredicate};
pub use live::LiveConnector;
pub use loopback::{LoopbackConnector, LoopbackPeer};

use crate::codec::TransportBlob;
use crate::config::{ResponseModality, SessionConfig};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, connection not yet started.
    Idle,
    /// Connecting or waiting for the service to accept the setup.
    Opening,
    /// Ready for outbound audio.
    Open,
    /// Finished; sends are no-ops.
    Closed,
}

/// Why a channel failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFailure {
    /// The connection could not be established.
    Connect {
        /// HTTP status of a rejected handshake, if there was one.
        status: Option<u16>,
        /// Failure detail.
        detail: String,
    },
    /// The service closed the connection with a non-normal close code.
    Rejected {
        /// WebSocket close code.
        code: u16,
        /// Close reason sent by the service.
        reason: String,
    },
    /// The connection broke.
    Transport(String),
    /// The service sent something the link could not handle.
    Protocol(String),
}

impl ChannelFailure {
    /// Human-readable detail, without the failure kind.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Connect { detail, .. } => detail,
            Self::Rejected { reason, .. } => reason,
            Self::Transport(detail) | Self::Protocol(detail) => detail,
        }
    }
}

impl fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect {
                status: Some(status),
                detail,
            } => write!(f, "connect failed (HTTP {status}): {detail}"),
            Self::Connect { status: None, detail } => write!(f, "connect failed: {detail}"),
            Self::Rejected { code, reason } => write!(f, "closed by service ({code}): {reason}"),
            Self::Transport(detail) => write!(f, "transport error: {detail}"),
            Self::Protocol(detail) => write!(f, "protocol error: {detail}"),
        }
    }
}

/// Inbound channel event, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The service accepted the session. Delivered at most once.
    Opened,
    /// A chunk of base64 PCM16 speech.
    AudioChunk(String),
    /// The user talked over the reply; drop queued speech.
    Interrupted,
    /// The service finished its turn.
    TurnComplete,
    /// Terminal: the channel failed.
    Error(ChannelFailure),
    /// Terminal: the channel closed normally.
    Closed,
}

impl ChannelEvent {
    /// Whether this event ends the channel's lifetime.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Closed)
    }
}

/// Result of handing a blob to a [`ChannelSender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the link. Held back until the channel opens.
    Queued,
    /// Perishable send while the channel was not open yet.
    DroppedNotReady,
    /// Outbound queue full.
    DroppedBackpressure,
    /// Channel already closed.
    DroppedClosed,
}

/// Everything a connector needs to open a session with the service.
#[derive(Clone)]
pub struct OpenRequest {
    /// WebSocket endpoint.
    pub endpoint: String,
    /// Model identifier.
    pub model: String,
    /// Prebuilt voice name.
    pub voice_name: String,
    /// Requested response modality.
    pub response_modality: ResponseModality,
    /// Persona text, passed through unchanged.
    pub instructions: String,
    /// API key for the service.
    pub api_key: Option<String>,
    /// Outbound queue capacity.
    pub outbound_queue: usize,
}

impl OpenRequest {
    /// Build a request from the session config and a resolved key.
    #[must_use]
    pub fn from_config(config: &SessionConfig, api_key: Option<String>) -> Self {
        Self {
            endpoint: config.transport.endpoint.clone(),
            model: config.transport.model.clone(),
            voice_name: config.transport.voice_name.clone(),
            response_modality: config.transport.response_modality,
            instructions: config.persona.instructions.clone(),
            api_key,
            outbound_queue: config.transport.outbound_queue,
        }
    }
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voice_name", &self.voice_name)
            .field("response_modality", &self.response_modality)
            .field("instructions_len", &self.instructions.len())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("outbound_queue", &self.outbound_queue)
            .finish()
    }
}

/// Opens channels to a voice service.
pub trait ChannelConnector: Send + Sync {
    /// Start opening a channel. Returns immediately; the outcome arrives as
    /// the channel's first event. Must be called within a tokio runtime.
    fn open(&self, request: OpenRequest) -> TransportChannel;
}

/// Non-blocking outbound handle, safe to call from the audio thread.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    outbound: mpsc::Sender<TransportBlob>,
    state: watch::Receiver<ChannelState>,
}

impl ChannelSender {
    /// Current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Send a blob, deferring it until open if the channel is still opening.
    /// A no-op once the channel is closed.
    pub fn send(&self, blob: TransportBlob) -> SendOutcome {
        match self.state() {
            ChannelState::Closed => SendOutcome::DroppedClosed,
            ChannelState::Idle | ChannelState::Opening | ChannelState::Open => self.enqueue(blob),
        }
    }

    /// Send live data: dropped unless the channel is open right now.
    pub fn send_perishable(&self, blob: TransportBlob) -> SendOutcome {
        match self.state() {
            ChannelState::Open => self.enqueue(blob),
            ChannelState::Idle | ChannelState::Opening => SendOutcome::DroppedNotReady,
            ChannelState::Closed => SendOutcome::DroppedClosed,
        }
    }

    fn enqueue(&self, blob: TransportBlob) -> SendOutcome {
        match self.outbound.try_send(blob) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::DroppedBackpressure,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("send after link shut down ignored");
                SendOutcome::DroppedClosed
            }
        }
    }
}

/// Session-side end of a channel.
///
/// Dropping it cancels the link task.
#[derive(Debug)]
pub struct TransportChannel {
    sender: ChannelSender,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    state: Arc<watch::Sender<ChannelState>>,
    cancel: CancellationToken,
}

impl TransportChannel {
    /// Create a channel and the link end that drives it.
    #[must_use]
    pub fn new(outbound_queue: usize) -> (Self, LinkEnd) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_queue.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Idle);
        let state = Arc::new(state_tx);
        let cancel = CancellationToken::new();

        let channel = Self {
            sender: ChannelSender {
                outbound: outbound_tx,
                state: state_rx,
            },
            events: events_rx,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
        };
        let link = LinkEnd {
            events: events_tx,
            state,
            outbound: outbound_rx,
            cancel,
            terminated: false,
        };
        (channel, link)
    }

    /// A sender handle for outbound blobs.
    #[must_use]
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.sender.state()
    }

    /// Wait for the next inbound event. `None` once the link is gone and
    /// every event has been read.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Take the next inbound event if one is already waiting.
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.events.try_recv().ok()
    }

    /// Close the channel now. Pending opens and sends are abandoned.
    pub fn close(&self) {
        self.state.send_replace(ChannelState::Closed);
        self.cancel.cancel();
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Driver-side end of a channel, held by the task that owns the connection.
///
/// Enforces the event contract: `Opened` at most once, and nothing after
/// the first terminal event. Dropping an unterminated link reports `Closed`.
#[derive(Debug)]
pub struct LinkEnd {
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Arc<watch::Sender<ChannelState>>,
    outbound: mpsc::Receiver<TransportBlob>,
    cancel: CancellationToken,
    terminated: bool,
}

impl LinkEnd {
    /// Current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Mark the connection attempt as started.
    pub fn opening(&self) {
        self.state.send_if_modified(|s| {
            if *s == ChannelState::Idle {
                *s = ChannelState::Opening;
                true
            } else {
                false
            }
        });
    }

    /// Resolve the open. Returns `false` (and emits nothing) if the channel
    /// was already opened or closed.
    pub fn open(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        let opened = self.state.send_if_modified(|s| match s {
            ChannelState::Idle | ChannelState::Opening => {
                *s = ChannelState::Open;
                true
            }
            ChannelState::Open | ChannelState::Closed => false,
        });
        if opened {
            self.emit(ChannelEvent::Opened);
        }
        opened
    }

    /// Deliver an inbound event. A terminal event ends the channel; anything
    /// after it is dropped.
    pub fn deliver(&mut self, event: ChannelEvent) {
        if event.is_terminal() {
            self.terminate(event);
        } else if event == ChannelEvent::Opened {
            self.open();
        } else if !self.terminated {
            self.emit(event);
        }
    }

    /// Terminate with an error.
    pub fn fail(&mut self, failure: ChannelFailure) {
        self.terminate(ChannelEvent::Error(failure));
    }

    /// Terminate normally.
    pub fn finish(&mut self) {
        self.terminate(ChannelEvent::Closed);
    }

    /// Whether a terminal event has been emitted.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Next blob queued by the session. `None` once every sender is gone.
    pub async fn next_outbound(&mut self) -> Option<TransportBlob> {
        self.outbound.recv().await
    }

    /// Take a queued blob without waiting.
    pub fn try_next_outbound(&mut self) -> Option<TransportBlob> {
        self.outbound.try_recv().ok()
    }

    /// Whether the session closed the channel.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when the session closes the channel.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn terminate(&mut self, event: ChannelEvent) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.state.send_replace(ChannelState::Closed);
        self.outbound.close();
        self.emit(event);
    }

    fn emit(&self, event: ChannelEvent) {
        // The session may already have dropped its end.
        let _ = self.events.send(event);
    }
}

impl Drop for LinkEnd {
    fn drop(&mut self) {
        self.finish();
    }
}
