//! Presentation-facing handle to a running [`SessionController`].
//!
//! [`SessionController`]: super::SessionController

use super::controller::StartOutcome;
use super::SessionStatus;
use crate::audio::LevelMeter;
use crate::error::{Result, SessionError};
use tokio::sync::{mpsc, oneshot, watch};

/// Request sent to the controller task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Start a session; answered once the start settles.
    Start(oneshot::Sender<Result<StartOutcome>>),
    /// Stop the current session.
    Stop(oneshot::Sender<()>),
    /// Ask for a credential.
    SelectCredential(oneshot::Sender<()>),
}

/// Cloneable handle to the controller task. The task tears the session down
/// and exits once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    input_level: LevelMeter,
    output_level: LevelMeter,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SessionCommand>,
        status: watch::Receiver<SessionStatus>,
        input_level: LevelMeter,
        output_level: LevelMeter,
    ) -> Self {
        Self {
            commands,
            status,
            input_level,
            output_level,
        }
    }

    /// Start a session and wait until it is connected, refused, or cancelled.
    ///
    /// # Errors
    ///
    /// Returns the hardware, channel, or credential error that ended the
    /// attempt, or [`SessionError::ControllerGone`].
    pub async fn start(&self) -> Result<StartOutcome> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Start(reply)).await?;
        response.await.map_err(|_| SessionError::ControllerGone)?
    }

    /// Stop the session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ControllerGone`] if the controller has exited.
    pub async fn stop(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Stop(reply)).await?;
        response.await.map_err(|_| SessionError::ControllerGone)
    }

    /// Ask the credential gate for a key.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ControllerGone`] if the controller has exited.
    pub async fn select_credential(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::SelectCredential(reply)).await?;
        response.await.map_err(|_| SessionError::ControllerGone)
    }

    /// Latest status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// A receiver notified on every status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Microphone RMS level.
    #[must_use]
    pub fn input_level(&self) -> f32 {
        self.input_level.level()
    }

    /// Speaker RMS level.
    #[must_use]
    pub fn output_level(&self) -> f32 {
        self.output_level.level()
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::ControllerGone)
    }
}
