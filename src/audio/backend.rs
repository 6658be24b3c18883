//! cpal-backed hardware contexts.
//!
//! Each context owns its `cpal::Stream` on a dedicated thread, so the handle
//! the controller holds is `Send` on every platform. Closing a context drops
//! the stream on that thread and joins it.

use super::capture::CpalInput;
use super::playback::CpalOutput;
use super::{AudioBackend, InputContext, LevelMeter, OutputContext, PlaybackEvent};
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Hardware contexts backed by the system's default cpal host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    /// Create the backend. Devices are only touched when a context opens.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SessionError::Audio(format!("cannot enumerate devices: {e}")))?;
        Ok(devices.filter_map(|d| device_name(&d)).collect())
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| SessionError::Audio(format!("cannot enumerate devices: {e}")))?;
        Ok(devices.filter_map(|d| device_name(&d)).collect())
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(&self, config: &AudioConfig, level: LevelMeter) -> Result<Box<dyn InputContext>> {
        Ok(Box::new(CpalInput::open(config, level)?))
    }

    fn open_output(
        &self,
        config: &AudioConfig,
        level: LevelMeter,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn OutputContext>> {
        Ok(Box::new(CpalOutput::open(config, level, events)?))
    }
}

pub(crate) fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_owned())
}

/// Pick the named input device, or the host default.
pub(crate) fn select_input_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let device = if let Some(name) = name {
        host.input_devices()
            .map_err(|e| SessionError::HardwareAcquisition(format!("cannot enumerate devices: {e}")))?
            .find(|d| device_name(d).as_deref() == Some(name))
            .ok_or_else(|| {
                SessionError::HardwareAcquisition(format!("input device '{name}' not found"))
            })?
    } else {
        host.default_input_device()
            .ok_or_else(|| SessionError::HardwareAcquisition("no default input device".into()))?
    };
    info!(
        "using input device: {}",
        device_name(&device).unwrap_or_else(|| "<unknown>".into())
    );
    Ok(device)
}

/// Pick the named output device, or the host default.
pub(crate) fn select_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let device = if let Some(name) = name {
        host.output_devices()
            .map_err(|e| SessionError::HardwareAcquisition(format!("cannot enumerate devices: {e}")))?
            .find(|d| device_name(d).as_deref() == Some(name))
            .ok_or_else(|| {
                SessionError::HardwareAcquisition(format!("output device '{name}' not found"))
            })?
    } else {
        host.default_output_device()
            .ok_or_else(|| SessionError::HardwareAcquisition("no default output device".into()))?
    };
    info!(
        "using output device: {}",
        device_name(&device).unwrap_or_else(|| "<unknown>".into())
    );
    Ok(device)
}

/// A thread that builds a cpal stream, plays it, and keeps it alive until
/// stopped.
pub(crate) struct StreamThread {
    name: &'static str,
    shutdown: Option<crossbeam_channel::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn the thread and wait until the stream is playing.
    ///
    /// # Errors
    ///
    /// Returns the error from `build`, or a hardware error if the stream
    /// could not start.
    pub(crate) fn spawn<F>(name: &'static str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(SessionError::HardwareAcquisition(format!(
                        "failed to start stream: {e}"
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Returns once the sender is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| SessionError::HardwareAcquisition(format!("cannot spawn {name}: {e}")))?;

        match off_worker(|| ready_rx.recv()) {
            Ok(Ok(())) => {
                debug!("{name} stream running");
                Ok(Self {
                    name,
                    shutdown: Some(shutdown_tx),
                    handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = off_worker(|| handle.join());
                Err(e)
            }
            Err(_) => {
                let _ = off_worker(|| handle.join());
                Err(SessionError::HardwareAcquisition(format!(
                    "{name} exited before the stream started"
                )))
            }
        }
    }

    /// Drop the stream and join the thread. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread panicked.
    pub(crate) fn stop(&mut self) -> Result<()> {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            off_worker(|| handle.join())
                .map_err(|_| SessionError::Audio(format!("{} panicked", self.name)))?;
            debug!("{} stream stopped", self.name);
        }
        Ok(())
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Run a blocking wait without stalling a multi-threaded runtime's worker.
/// `block_in_place` panics on a current-thread runtime, so there (and outside
/// any runtime) the wait runs inline.
fn off_worker<T>(wait: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(rt) if rt.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}
