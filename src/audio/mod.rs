//! Audio hardware contexts: microphone capture, speaker playback, and the
//! analysis taps the visualizer reads.
//!
//! The session controller talks to hardware only through [`AudioBackend`],
//! [`InputContext`], and [`OutputContext`]; [`CpalBackend`] is the real
//! implementation.

pub mod backend;
pub mod capture;
pub mod playback;

pub use backend::CpalBackend;

use crate::codec::{self, FormatError};
use crate::config::AudioConfig;
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// Identifier the playback scheduler assigns to each scheduled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u64);

/// A decoded, ready-to-play mono sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Build a frame from mono samples at `sample_rate`.
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode an inbound transport chunk (base64 PCM16) into a frame.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the chunk is not valid transport text or
    /// does not hold whole PCM16 samples.
    pub fn from_transport_text(text: &str, sample_rate: u32) -> std::result::Result<Self, FormatError> {
        let bytes = codec::decode_text(text)?;
        let samples = codec::pcm16_to_float(&bytes)?;
        Ok(Self::new(samples, sample_rate))
    }

    /// The samples.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Consume the frame, returning its samples.
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Sample rate in Hz.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Lock-free RMS level shared between an audio thread and readers.
///
/// Writers are the hardware contexts; the visualizer only reads.
#[derive(Debug, Clone, Default)]
pub struct LevelMeter(Arc<AtomicU32>);

impl LevelMeter {
    /// A meter reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest RMS level.
    #[must_use]
    pub fn level(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, rms: f32) {
        self.0.store(rms.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_from_samples(&self, samples: &[f32]) {
        self.set(rms(samples));
    }
}

/// Root-mean-square of a buffer; zero for an empty one.
pub(crate) fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Notifications from the output context back to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A scheduled frame played to its end.
    FrameEnded(FrameId),
}

/// Callback invoked with every complete capture block.
pub type BlockProcessor = Box<dyn FnMut(&[f32]) + Send>;

/// Destination for scheduled frames.
pub trait FrameSink {
    /// Start playing `frame` at output-clock time `at` (seconds).
    fn start_frame(&mut self, id: FrameId, frame: AudioFrame, at: f64);

    /// Stop a frame immediately. Unknown ids are ignored.
    fn stop_frame(&mut self, id: FrameId);
}

/// A microphone capture context tuned to the input sample rate.
pub trait InputContext: Send {
    /// Route every complete capture block to `processor`, replacing any
    /// previous one.
    fn connect(&mut self, processor: BlockProcessor);

    /// Stop routing capture blocks. Idempotent.
    fn disconnect(&mut self);

    /// Release the device. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the device could not be released cleanly.
    fn close(&mut self) -> Result<()>;
}

/// A speaker output context tuned to the output sample rate.
pub trait OutputContext: FrameSink + Send {
    /// Current output-clock time in seconds.
    fn current_time(&self) -> f64;

    /// Release the device. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the device could not be released cleanly.
    fn close(&mut self) -> Result<()>;
}

/// Source of hardware contexts.
pub trait AudioBackend: Send + Sync {
    /// Acquire the microphone.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SessionError::HardwareAcquisition`] if no usable
    /// input device is available.
    fn open_input(&self, config: &AudioConfig, level: LevelMeter) -> Result<Box<dyn InputContext>>;

    /// Acquire the speakers. Frame completions are posted to `events`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SessionError::HardwareAcquisition`] if no usable
    /// output device is available.
    fn open_output(
        &self,
        config: &AudioConfig,
        level: LevelMeter,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn OutputContext>>;
}
