//! Microphone audio capture using cpal.
//!
//! Captures audio at the device's native sample rate, mixes down to mono,
//! downsamples to the configured input rate, and cuts the stream into
//! fixed-size blocks for the capture processor.

use super::backend::{StreamThread, select_input_device};
use super::{BlockProcessor, InputContext, LevelMeter};
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};
use cpal::StreamConfig;
use cpal::traits::DeviceTrait;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

type ProcessorSlot = Arc<Mutex<Option<BlockProcessor>>>;

/// Microphone capture context.
///
/// The stream runs from `open` until `close`; blocks only reach a processor
/// while one is connected.
pub struct CpalInput {
    processor: ProcessorSlot,
    thread: StreamThread,
}

impl CpalInput {
    /// Acquire the microphone and start capturing.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then converts to mono at the target rate in software.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HardwareAcquisition`] if no input device is
    /// available or the stream cannot be started.
    pub fn open(config: &AudioConfig, level: LevelMeter) -> Result<Self> {
        let processor: ProcessorSlot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&processor);
        let device_name = config.input_device.clone();
        let target_rate = config.input_sample_rate;
        let block_size = config.capture_block_size;

        let thread = StreamThread::spawn("voxlink-capture", move || {
            let device = select_input_device(device_name.as_deref())?;
            let default_config = device.default_input_config().map_err(|e| {
                SessionError::HardwareAcquisition(format!("no default input config: {e}"))
            })?;

            let native_rate = default_config.sample_rate();
            let native_channels = default_config.channels();
            let stream_config = StreamConfig {
                channels: native_channels,
                sample_rate: native_rate,
                buffer_size: cpal::BufferSize::Default,
            };

            info!(
                "native input config: {}Hz, {} channels -> {}Hz blocks of {}",
                native_rate, native_channels, target_rate, block_size
            );

            let mut blocks = BlockAccumulator::new(block_size);
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                        let mono = if native_channels > 1 {
                            to_mono(data, native_channels)
                        } else {
                            data.to_vec()
                        };
                        let samples = downsample(&mono, native_rate, target_rate);
                        level.set_from_samples(&samples);

                        blocks.push(&samples, |block| {
                            let mut guard = match slot.lock() {
                                Ok(g) => g,
                                Err(p) => p.into_inner(),
                            };
                            if let Some(process) = guard.as_mut() {
                                process(block);
                            }
                        });
                    },
                    move |err| {
                        error!("audio input stream error: {err}");
                    },
                    None,
                )
                .map_err(|e| {
                    SessionError::HardwareAcquisition(format!("failed to build input stream: {e}"))
                })
        })?;

        info!("audio capture started");
        Ok(Self { processor, thread })
    }

    fn set_processor(&self, processor: Option<BlockProcessor>) {
        let mut guard = match self.processor.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        *guard = processor;
    }
}

impl InputContext for CpalInput {
    fn connect(&mut self, processor: BlockProcessor) {
        self.set_processor(Some(processor));
    }

    fn disconnect(&mut self) {
        self.set_processor(None);
    }

    fn close(&mut self) -> Result<()> {
        self.disconnect();
        self.thread.stop()?;
        info!("audio capture stopped");
        Ok(())
    }
}

/// Cuts a continuous sample stream into blocks of exactly `size` samples.
pub(crate) struct BlockAccumulator {
    block: Vec<f32>,
    size: usize,
}

impl BlockAccumulator {
    pub(crate) fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            block: Vec::with_capacity(size),
            size,
        }
    }

    /// Append samples, calling `emit` once per completed block.
    pub(crate) fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.size - self.block.len()).min(rest.len());
            self.block.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.block.len() == self.size {
                emit(&self.block);
                self.block.clear();
            }
        }
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation downsampler.
///
/// Speech energy sits below 8kHz, so no anti-alias filter is applied when
/// going from 48kHz to 16kHz.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}
