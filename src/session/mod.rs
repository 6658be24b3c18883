//! The voice session: state machine, capture path, and playback scheduling.

pub mod capture_encoder;
pub mod controller;
pub mod handle;
pub mod messages;
pub mod scheduler;

pub use capture_encoder::{CaptureEncoder, CaptureStats, Submission};
pub use controller::{SessionController, SessionEvent, StartOutcome};
pub use handle::{SessionCommand, SessionHandle};
pub use scheduler::PlaybackScheduler;

use std::fmt;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session. Initial and terminal.
    #[default]
    Disconnected,
    /// Hardware acquired, waiting for the channel to open.
    Connecting,
    /// Audio is flowing both ways.
    Connected,
    /// A failure is being torn down. Never a resting state.
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of the session for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    /// Current state.
    pub state: SessionState,
    /// Whether reply audio is scheduled or playing.
    pub is_speaking: bool,
    /// Whether the user must select a credential before starting.
    pub needs_credential: bool,
    /// Last user-visible error, cleared by the next start.
    pub error_message: Option<String>,
}

impl SessionStatus {
    /// Whether audio is flowing.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}
