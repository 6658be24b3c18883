//! Audio playback to system speakers via cpal.
//!
//! Frames are handed to a [`Mixer`] with an absolute start time. The audio
//! callback renders every frame that overlaps the current buffer, so frames
//! scheduled back-to-back play without a gap. The number of samples rendered
//! so far is the output clock.

use super::backend::{StreamThread, select_output_device};
use super::{AudioFrame, FrameId, FrameSink, LevelMeter, OutputContext, PlaybackEvent};
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};
use cpal::StreamConfig;
use cpal::traits::DeviceTrait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{error, info};

/// A frame placed on the output timeline.
struct Voice {
    id: FrameId,
    samples: Vec<f32>,
    /// Absolute start position in samples.
    start: u64,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Sample-accurate mixer shared between the controller and the audio thread.
pub(crate) struct Mixer {
    voices: Vec<Voice>,
    /// Samples rendered since the context opened.
    clock: u64,
    sample_rate: u32,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl Mixer {
    pub(crate) fn new(sample_rate: u32, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            voices: Vec::new(),
            clock: 0,
            sample_rate: sample_rate.max(1),
            events,
        }
    }

    pub(crate) fn now_secs(&self) -> f64 {
        self.clock as f64 / f64::from(self.sample_rate)
    }

    /// Place `samples` at `at` seconds. A start already in the past begins
    /// at the next rendered sample.
    pub(crate) fn schedule(&mut self, id: FrameId, samples: Vec<f32>, at: f64) {
        let requested = (at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let voice = Voice {
            id,
            samples,
            start: requested.max(self.clock),
        };
        if voice.samples.is_empty() {
            let _ = self.events.send(PlaybackEvent::FrameEnded(id));
            return;
        }
        self.voices.push(voice);
    }

    pub(crate) fn stop(&mut self, id: FrameId) {
        self.voices.retain(|v| v.id != id);
    }

    pub(crate) fn clear(&mut self) {
        self.voices.clear();
    }

    /// Render the next `out.len() / channels` frames and advance the clock.
    pub(crate) fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        for (n, frame) in out.chunks_exact_mut(channels).enumerate() {
            let t = self.clock + n as u64;
            let mut acc = 0.0f32;
            for voice in &self.voices {
                if t >= voice.start
                    && let Some(s) = voice.samples.get((t - voice.start) as usize)
                {
                    acc += s;
                }
            }
            frame.fill(acc.clamp(-1.0, 1.0));
        }
        self.clock += frames as u64;

        let clock = self.clock;
        let events = &self.events;
        self.voices.retain(|voice| {
            let done = voice.end() <= clock;
            if done {
                let _ = events.send(PlaybackEvent::FrameEnded(voice.id));
            }
            !done
        });
    }
}

/// Speaker output context at the configured output sample rate.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    thread: StreamThread,
}

impl CpalOutput {
    /// Acquire the output device and start the (initially silent) stream.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HardwareAcquisition`] if no output device is
    /// available or the stream cannot be started.
    pub fn open(
        config: &AudioConfig,
        level: LevelMeter,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::new(config.output_sample_rate, events)));
        let render_mixer = Arc::clone(&mixer);
        let device_name = config.output_device.clone();
        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let thread = StreamThread::spawn("voxlink-playback", move || {
            let device = select_output_device(device_name.as_deref())?;
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                        let mut mixer = match render_mixer.lock() {
                            Ok(m) => m,
                            Err(p) => p.into_inner(),
                        };
                        mixer.render(data, 1);
                        drop(mixer);
                        level.set_from_samples(data);
                    },
                    move |err| {
                        error!("audio output stream error: {err}");
                    },
                    None,
                )
                .map_err(|e| {
                    SessionError::HardwareAcquisition(format!("failed to build output stream: {e}"))
                })
        })?;

        info!("audio playback started at {}Hz", config.output_sample_rate);
        Ok(Self { mixer, thread })
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        match self.mixer.lock() {
            Ok(m) => m,
            Err(p) => p.into_inner(),
        }
    }
}

impl FrameSink for CpalOutput {
    fn start_frame(&mut self, id: FrameId, frame: AudioFrame, at: f64) {
        self.mixer().schedule(id, frame.into_samples(), at);
    }

    fn stop_frame(&mut self, id: FrameId) {
        self.mixer().stop(id);
    }
}

impl OutputContext for CpalOutput {
    fn current_time(&self) -> f64 {
        self.mixer().now_secs()
    }

    fn close(&mut self) -> Result<()> {
        self.mixer().clear();
        self.thread.stop()?;
        info!("audio playback stopped");
        Ok(())
    }
}
