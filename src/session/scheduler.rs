//! Gapless playback scheduling on the output clock.

use crate::audio::{AudioFrame, FrameId, FrameSink};
use std::collections::BTreeSet;

/// Schedules decoded frames back-to-back and tracks which are still playing.
///
/// Each frame starts where the previous one ends, or at the current output
/// time if the cursor has fallen behind. Arrival time never matters, so
/// frames that take different times to decode still play without gaps.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    /// Output-clock time at which the next frame starts, in seconds.
    cursor: f64,
    active: BTreeSet<FrameId>,
    next_id: u64,
}

impl PlaybackScheduler {
    /// An empty scheduler with the cursor at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `frame` after everything already scheduled and return its
    /// start time.
    pub fn schedule_frame<S>(&mut self, frame: AudioFrame, now: f64, sink: &mut S) -> f64
    where
        S: FrameSink + ?Sized,
    {
        let start = self.cursor.max(now);
        self.cursor = start + frame.duration_secs();

        let id = FrameId(self.next_id);
        self.next_id += 1;
        self.active.insert(id);
        sink.start_frame(id, frame, start);
        start
    }

    /// A frame finished playing. Returns `false` for ids no longer tracked,
    /// such as frames removed by a flush.
    pub fn complete(&mut self, id: FrameId) -> bool {
        self.active.remove(&id)
    }

    /// Stop every active frame, forget them, and reset the cursor to zero.
    /// Returns how many frames were stopped.
    pub fn flush<S>(&mut self, sink: &mut S) -> usize
    where
        S: FrameSink + ?Sized,
    {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active) {
            sink.stop_frame(id);
        }
        self.cursor = 0.0;
        stopped
    }

    /// Whether any frame is scheduled or playing.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    /// Start time of the next frame, before clamping to the output clock.
    #[must_use]
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of active frames.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        started: Vec<(FrameId, f64)>,
        stopped: Vec<FrameId>,
    }

    impl FrameSink for RecordingSink {
        fn start_frame(&mut self, id: FrameId, _frame: AudioFrame, at: f64) {
            self.started.push((id, at));
        }

        fn stop_frame(&mut self, id: FrameId) {
            self.stopped.push(id);
        }
    }

    fn frame(secs: f64) -> AudioFrame {
        let rate = 24_000;
        AudioFrame::new(vec![0.0; (secs * f64::from(rate)).round() as usize], rate)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn frames_play_back_to_back() {
        let mut scheduler = PlaybackScheduler::new();
        let mut sink = RecordingSink::default();
        let starts: Vec<f64> = [0.5, 0.3, 0.4]
            .iter()
            .map(|d| scheduler.schedule_frame(frame(*d), 0.0, &mut sink))
            .collect();

        assert!(close(starts[0], 0.0));
        assert!(close(starts[1], 0.5));
        assert!(close(starts[2], 0.8));
        assert!(close(scheduler.cursor(), 1.2));
        assert_eq!(scheduler.active_len(), 3);
        assert!(scheduler.is_speaking());
    }

    #[test]
    fn late_frame_starts_at_output_time() {
        let mut scheduler = PlaybackScheduler::new();
        let mut sink = RecordingSink::default();
        scheduler.schedule_frame(frame(0.5), 0.0, &mut sink);
        let start = scheduler.schedule_frame(frame(0.5), 2.0, &mut sink);
        assert!(close(start, 2.0));
        assert!(close(scheduler.cursor(), 2.5));
    }

    #[test]
    fn flush_stops_everything_and_resets_cursor() {
        let mut scheduler = PlaybackScheduler::new();
        let mut sink = RecordingSink::default();
        scheduler.schedule_frame(frame(0.5), 0.0, &mut sink);
        scheduler.schedule_frame(frame(0.3), 0.0, &mut sink);

        assert_eq!(scheduler.flush(&mut sink), 2);
        assert_eq!(sink.stopped, vec![FrameId(0), FrameId(1)]);
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.cursor(), 0.0);

        let start = scheduler.schedule_frame(frame(0.4), 0.6, &mut sink);
        assert!(close(start, 0.6));
    }

    #[test]
    fn completion_removes_only_known_frames() {
        let mut scheduler = PlaybackScheduler::new();
        let mut sink = RecordingSink::default();
        scheduler.schedule_frame(frame(0.1), 0.0, &mut sink);
        scheduler.schedule_frame(frame(0.1), 0.0, &mut sink);

        assert!(scheduler.complete(FrameId(0)));
        assert!(!scheduler.complete(FrameId(0)));
        assert!(scheduler.is_speaking());
        assert!(scheduler.complete(FrameId(1)));
        assert!(!scheduler.is_speaking());
    }

    #[test]
    fn completion_after_flush_is_ignored() {
        let mut scheduler = PlaybackScheduler::new();
        let mut sink = RecordingSink::default();
        scheduler.schedule_frame(frame(0.1), 0.0, &mut sink);
        scheduler.flush(&mut sink);
        scheduler.schedule_frame(frame(0.1), 0.0, &mut sink);
        assert!(!scheduler.complete(FrameId(0)));
        assert_eq!(scheduler.active_len(), 1);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut scheduler = PlaybackScheduler::new();
        let mut sink = RecordingSink::default();
        scheduler.schedule_frame(frame(0.1), 0.0, &mut sink);
        scheduler.flush(&mut sink);
        scheduler.schedule_frame(frame(0.1), 0.0, &mut sink);
        let ids: Vec<FrameId> = sink.started.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![FrameId(0), FrameId(1)]);
    }
}
