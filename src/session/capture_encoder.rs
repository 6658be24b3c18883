//! Capture path: microphone blocks to outbound transport blobs.
//!
//! Runs on the audio thread. Nothing here blocks: a block the channel cannot
//! take right now is dropped, since a newer block is already on its way.

use crate::audio::BlockProcessor;
use crate::codec::TransportBlob;
use crate::transport::{ChannelSender, SendOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// What happened to one capture block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Queued for the open channel.
    Sent,
    /// The session was not active.
    DroppedInactive,
    /// The channel was not open yet.
    DroppedNotReady,
    /// The outbound queue was full.
    DroppedBackpressure,
    /// The channel was closed.
    DroppedClosed,
}

/// Sent/dropped block counters, shared with the controller.
#[derive(Debug, Default)]
pub struct CaptureStats {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureStats {
    /// Blocks handed to the channel.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Blocks dropped for any reason.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record(&self, submission: Submission) {
        let counter = match submission {
            Submission::Sent => &self.sent,
            _ => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Encodes capture blocks and submits them while the session is active.
pub struct CaptureEncoder {
    active: Arc<AtomicBool>,
    sender: ChannelSender,
    sample_rate: u32,
    stats: Arc<CaptureStats>,
}

impl CaptureEncoder {
    /// Encoder declaring `sample_rate` on every blob.
    #[must_use]
    pub fn new(active: Arc<AtomicBool>, sender: ChannelSender, sample_rate: u32) -> Self {
        Self {
            active,
            sender,
            sample_rate,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    /// Shared counters for this encoder.
    #[must_use]
    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Encode and submit one block.
    pub fn on_block(&self, block: &[f32]) -> Submission {
        let submission = if self.active.load(Ordering::Acquire) {
            let blob = TransportBlob::from_samples(block, self.sample_rate);
            match self.sender.send_perishable(blob) {
                SendOutcome::Queued => Submission::Sent,
                SendOutcome::DroppedNotReady => Submission::DroppedNotReady,
                SendOutcome::DroppedBackpressure => Submission::DroppedBackpressure,
                SendOutcome::DroppedClosed => Submission::DroppedClosed,
            }
        } else {
            Submission::DroppedInactive
        };

        if submission != Submission::Sent {
            debug!(?submission, samples = block.len(), "capture block dropped");
        }
        self.stats.record(submission);
        submission
    }

    /// Wrap the encoder as a capture-block callback.
    #[must_use]
    pub fn into_processor(self) -> BlockProcessor {
        Box::new(move |block| {
            self.on_block(block);
        })
    }
}
