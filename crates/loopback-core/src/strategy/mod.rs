//! Test strategies
//!
//! A strategy decides what the recorder does with each input buffer and
//! what the player puts in each output buffer. Both strategies share the
//! poll-driven [`collector::RecordingCollector`] that hands the recording
//! to the non-real-time side.
//!
//! Nothing here logs from the callbacks: data-path events bump
//! [`DataPathCounters`] and the collector reports them from its own thread.

pub mod collector;
pub mod context;
pub mod glitch;
pub mod latency;

pub use collector::{ImpulseCountdown, RecordingCollector};
pub use context::{GlitchParams, LatencyParams, TestContext, TestKind};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Data-path event counters bumped from the callbacks
#[derive(Debug, Default)]
pub struct DataPathCounters {
    /// Recorded frames the recording FIFO had no room for
    pub recording_overrun_frames: AtomicU64,
    /// Recorded frames the passthrough FIFO had no room for
    pub jitter_overrun_frames: AtomicU64,
    /// Output buffers filled with silence because input was missing
    pub player_underruns: AtomicU64,
    /// Input frames dropped to keep the passthrough backlog under two buffers
    pub discarded_input_frames: AtomicU64,
    /// Backlog drops that happened after an earlier drop
    pub repeat_discards: AtomicU64,
    /// Input frames dropped by the one-time drain after the initial silence
    pub drained_input_frames: AtomicU64,
    /// Impulses started
    pub impulses: AtomicU64,
    /// Frames written to the cross-boundary buffer
    pub byte_buffer_frames: AtomicU64,
}

impl DataPathCounters {
    #[inline]
    pub fn add(counter: &AtomicU64, value: u64) {
        if value > 0 {
            counter.fetch_add(value, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DataPathSnapshot {
        DataPathSnapshot {
            recording_overrun_frames: self.recording_overrun_frames.load(Ordering::Relaxed),
            jitter_overrun_frames: self.jitter_overrun_frames.load(Ordering::Relaxed),
            player_underruns: self.player_underruns.load(Ordering::Relaxed),
            discarded_input_frames: self.discarded_input_frames.load(Ordering::Relaxed),
            repeat_discards: self.repeat_discards.load(Ordering::Relaxed),
            drained_input_frames: self.drained_input_frames.load(Ordering::Relaxed),
            impulses: self.impulses.load(Ordering::Relaxed),
            byte_buffer_frames: self.byte_buffer_frames.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`DataPathCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPathSnapshot {
    pub recording_overrun_frames: u64,
    pub jitter_overrun_frames: u64,
    pub player_underruns: u64,
    pub discarded_input_frames: u64,
    pub repeat_discards: u64,
    pub drained_input_frames: u64,
    pub impulses: u64,
    pub byte_buffer_frames: u64,
}

impl DataPathSnapshot {
    /// Per-field difference to an earlier snapshot
    pub fn since(&self, earlier: &DataPathSnapshot) -> DataPathSnapshot {
        DataPathSnapshot {
            recording_overrun_frames: self
                .recording_overrun_frames
                .saturating_sub(earlier.recording_overrun_frames),
            jitter_overrun_frames: self
                .jitter_overrun_frames
                .saturating_sub(earlier.jitter_overrun_frames),
            player_underruns: self.player_underruns.saturating_sub(earlier.player_underruns),
            discarded_input_frames: self
                .discarded_input_frames
                .saturating_sub(earlier.discarded_input_frames),
            repeat_discards: self.repeat_discards.saturating_sub(earlier.repeat_discards),
            drained_input_frames: self
                .drained_input_frames
                .saturating_sub(earlier.drained_input_frames),
            impulses: self.impulses.saturating_sub(earlier.impulses),
            byte_buffer_frames: self
                .byte_buffer_frames
                .saturating_sub(earlier.byte_buffer_frames),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_delta() {
        let counters = DataPathCounters::default();
        DataPathCounters::add(&counters.player_underruns, 2);
        let first = counters.snapshot();
        DataPathCounters::add(&counters.player_underruns, 3);
        DataPathCounters::add(&counters.impulses, 1);
        let second = counters.snapshot();

        let delta = second.since(&first);
        assert_eq!(delta.player_underruns, 3);
        assert_eq!(delta.impulses, 1);
        assert_eq!(delta.recording_overrun_frames, 0);
        assert_eq!(second.player_underruns, 5);
    }
}
