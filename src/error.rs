//! Error types for the voice session core.

use crate::credentials::CredentialError;
use crate::session::SessionState;

/// Top-level error type for the voice session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Microphone or audio output could not be acquired.
    #[error("hardware unavailable: {0}")]
    HardwareAcquisition(String),

    /// Audio device or stream error after acquisition.
    #[error("audio error: {0}")]
    Audio(String),

    /// The transport channel failed before it opened.
    #[error("channel failed to open: {0}")]
    ChannelOpen(String),

    /// The voice service rejected the credential.
    #[error("credential rejected by service: {0}")]
    CredentialRejected(String),

    /// Credential storage error.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// A command was issued in a state that does not accept it.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        /// The rejected command.
        action: &'static str,
        /// The state the session was in.
        state: SessionState,
    },

    /// The session controller task is no longer running.
    #[error("session controller stopped")]
    ControllerGone,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;
