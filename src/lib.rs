//! voxlink: realtime full-duplex voice sessions with a hosted speech model.
//!
//! The microphone is captured in fixed-size blocks, encoded as 16-bit PCM,
//! and streamed over a bidirectional channel to the voice service. Reply
//! speech comes back as encoded chunks that are decoded and scheduled for
//! gapless playback, and server barge-in notices flush whatever is queued.
//!
//! # Architecture
//!
//! - **Codec** ([`codec`]): PCM16 and base64 conversion for transport blobs
//! - **Audio** ([`audio`]): `cpal` capture and playback contexts behind traits
//! - **Transport** ([`transport`]): the channel state machine, the WebSocket
//!   link, and failure classification
//! - **Session** ([`session`]): the controller, capture encoder, and
//!   playback scheduler
//! - **Credentials** ([`credentials`]): API key storage and the start gate

pub mod audio;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod error;
pub mod persona;
pub mod session;
pub mod transport;

pub use codec::{FormatError, TransportBlob};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use session::{SessionController, SessionHandle, SessionState, SessionStatus, StartOutcome};
