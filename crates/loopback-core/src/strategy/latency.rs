//! Latency test strategy
//!
//! The recorder pushes every input buffer into two FIFOs: the passthrough
//! ("jitter") FIFO the player echoes back, and the recording FIFO the
//! collector drains. The player runs through three phases:
//!
//! 1. initial silence long enough to cover analog settling, while the
//!    passthrough FIFO is kept empty;
//! 2. a one-time drain of whatever input queued up meanwhile;
//! 3. steady state: play the input back, keeping the passthrough backlog
//!    under two buffers, and play the impulse once the trigger fires.
//!
//! The impulse then circulates through the loop and the recording shows it
//! once per round trip.

use super::DataPathCounters;
use crate::audio::fifo::{FifoReader, FifoWriter};
use crate::audio::sample::Sample;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Silence emitted before passthrough starts
pub const INITIAL_SILENCE_MS: usize = 240;

/// Length of the default calibration impulse
pub const CALIBRATION_BURST_FRAMES: usize = 64;

/// The passthrough backlog is kept strictly below this many buffers
pub const JITTER_THRESHOLD_BUFFERS: usize = 2;

/// Frames of initial silence at `sample_rate`, rounded up
pub fn initial_silence_frames(sample_rate: u32) -> usize {
    (sample_rate as usize * INITIAL_SILENCE_MS).div_ceil(1000)
}

/// Short square-wave burst at a quarter of the sample rate
///
/// A single-sample click is often too weak to survive the analog path; a
/// few cycles of a high square wave come back reliably.
pub fn calibration_burst(frames: usize) -> Vec<Sample> {
    (0..frames)
        .map(|i| if i % 8 < 4 { i16::MAX } else { i16::MIN })
        .collect()
}

/// One-shot flag the collector arms and the player consumes
#[derive(Debug, Default)]
pub struct ImpulseTrigger {
    armed: AtomicBool,
}

impl ImpulseTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Disarm, returning whether the trigger was armed
    pub fn take(&self) -> bool {
        self.armed.swap(false, Ordering::AcqRel)
    }
}

/// Input side of the latency test
pub struct LatencyRecorder {
    jitter: FifoWriter<Sample>,
    recording: FifoWriter<Sample>,
    /// Frames still zeroed before they are queued
    ignore_remaining: usize,
    /// Frames still dropped entirely
    discard_remaining: usize,
}

impl LatencyRecorder {
    pub fn new(
        jitter: FifoWriter<Sample>,
        recording: FifoWriter<Sample>,
        ignore_first_frames: usize,
        input_frames_to_discard: usize,
    ) -> Self {
        Self {
            jitter,
            recording,
            ignore_remaining: ignore_first_frames,
            discard_remaining: input_frames_to_discard,
        }
    }

    pub fn on_input(&mut self, buffer: &mut [Sample], channels: usize, counters: &DataPathCounters) {
        let frames = buffer.len() / channels;
        if self.discard_remaining > 0 {
            self.discard_remaining = self.discard_remaining.saturating_sub(frames);
            return;
        }

        if self.ignore_remaining > 0 {
            let erase = self.ignore_remaining.min(frames);
            self.ignore_remaining -= erase;
            buffer[..erase * channels].fill(0);
        }

        let written = self.jitter.write(buffer);
        DataPathCounters::add(&counters.jitter_overrun_frames, (frames - written) as u64);

        let written = self.recording.write(buffer);
        DataPathCounters::add(&counters.recording_overrun_frames, (frames - written) as u64);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Silence { remaining: usize },
    Drain,
    Steady,
}

/// Output side of the latency test
pub struct LatencyPlayer {
    jitter: FifoReader<Sample>,
    phase: Phase,
    impulse: Arc<[Sample]>,
    /// Next impulse frame while an impulse is being played
    impulse_pos: Option<usize>,
    trigger: Arc<ImpulseTrigger>,
    total_discarded: u64,
}

impl LatencyPlayer {
    pub fn new(
        jitter: FifoReader<Sample>,
        initial_silence_frames: usize,
        impulse: Arc<[Sample]>,
        trigger: Arc<ImpulseTrigger>,
    ) -> Self {
        let phase = if initial_silence_frames > 0 {
            Phase::Silence {
                remaining: initial_silence_frames,
            }
        } else {
            Phase::Drain
        };
        Self {
            jitter,
            phase,
            impulse,
            impulse_pos: None,
            trigger,
            total_discarded: 0,
        }
    }

    /// Whether passthrough has started
    pub fn is_steady(&self) -> bool {
        self.phase == Phase::Steady
    }

    pub fn on_output(&mut self, buffer: &mut [Sample], channels: usize, counters: &DataPathCounters) {
        let frames = buffer.len() / channels;
        if frames == 0 {
            return;
        }

        match self.phase {
            Phase::Silence { remaining } => {
                self.jitter.skip(usize::MAX);
                buffer.fill(0);
                let remaining = remaining.saturating_sub(frames);
                self.phase = if remaining == 0 {
                    Phase::Drain
                } else {
                    Phase::Silence { remaining }
                };
                return;
            }
            Phase::Drain => {
                let drained = self.jitter.skip(usize::MAX);
                DataPathCounters::add(&counters.drained_input_frames, drained as u64);
                buffer.fill(0);
                self.phase = Phase::Steady;
                return;
            }
            Phase::Steady => {}
        }

        self.discard_backlog(frames, counters);

        if self.jitter.read(buffer) != frames {
            buffer.fill(0);
            DataPathCounters::add(&counters.player_underruns, 1);
        }

        if self.impulse_pos.is_none() && self.trigger.take() {
            self.impulse_pos = Some(0);
            self.total_discarded = 0;
            DataPathCounters::add(&counters.impulses, 1);
        }
        if let Some(pos) = self.impulse_pos {
            let end = (pos + frames).min(self.impulse.len());
            let chunk = &self.impulse[pos.min(end)..end];
            for (frame, &value) in buffer.chunks_exact_mut(channels).zip(chunk) {
                frame.fill(value);
            }
            buffer[chunk.len() * channels..].fill(0);
            self.impulse_pos = (end < self.impulse.len()).then_some(end);
        }
    }

    /// Drop whole buffers of the current size while at least two are queued
    fn discard_backlog(&mut self, frames: usize, counters: &DataPathCounters) {
        let mut discarded = 0usize;
        while self.jitter.avail_to_read() >= frames * JITTER_THRESHOLD_BUFFERS {
            let skipped = self.jitter.skip(frames);
            discarded += skipped;
            if skipped != frames {
                break;
            }
        }
        if discarded > 0 {
            if self.total_discarded > 0 {
                DataPathCounters::add(&counters.repeat_discards, 1);
            }
            self.total_discarded += discarded as u64;
            DataPathCounters::add(&counters.discarded_input_frames, discarded as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fifo::Fifo;
    use std::sync::atomic::Ordering;

    fn fifo(frames: usize, channels: usize) -> (FifoWriter<Sample>, FifoReader<Sample>) {
        Fifo::<Sample>::new(frames, channels).unwrap().split()
    }

    #[test]
    fn test_initial_silence_frames() {
        assert_eq!(initial_silence_frames(48000), 11520);
        assert_eq!(initial_silence_frames(44100), 10584);
        assert_eq!(initial_silence_frames(22050), 5292);
        assert_eq!(initial_silence_frames(8001), 1921);
    }

    #[test]
    fn test_calibration_burst() {
        let burst = calibration_burst(10);
        assert_eq!(&burst[..8], &[32767, 32767, 32767, 32767, -32768, -32768, -32768, -32768]);
        assert_eq!(burst[8], 32767);
    }

    #[test]
    fn test_trigger_is_one_shot() {
        let trigger = ImpulseTrigger::new();
        assert!(!trigger.take());
        trigger.arm();
        assert!(trigger.is_armed());
        assert!(trigger.take());
        assert!(!trigger.take());
    }

    #[test]
    fn test_recorder_zeroes_ignored_frames() {
        let (jw, mut jr) = fifo(16, 1);
        let (rw, mut rr) = fifo(16, 1);
        let counters = DataPathCounters::default();
        let mut recorder = LatencyRecorder::new(jw, rw, 3, 0);

        let mut buffer = vec![5i16; 2];
        recorder.on_input(&mut buffer, 1, &counters);
        let mut buffer = vec![6i16; 2];
        recorder.on_input(&mut buffer, 1, &counters);

        let mut out = [9i16; 4];
        assert_eq!(jr.read(&mut out), 4);
        assert_eq!(out, [0, 0, 0, 6]);
        assert_eq!(rr.read(&mut out), 4);
        assert_eq!(out, [0, 0, 0, 6]);
    }

    #[test]
    fn test_recorder_discards_leading_input() {
        let (jw, jr) = fifo(16, 1);
        let (rw, rr) = fifo(16, 1);
        let counters = DataPathCounters::default();
        let mut recorder = LatencyRecorder::new(jw, rw, 0, 3);

        recorder.on_input(&mut [1, 1], 1, &counters);
        recorder.on_input(&mut [2, 2], 1, &counters);
        assert_eq!(jr.avail_to_read(), 0);
        recorder.on_input(&mut [3, 3], 1, &counters);
        assert_eq!(jr.avail_to_read(), 2);
        assert_eq!(rr.avail_to_read(), 2);
    }

    #[test]
    fn test_recorder_counts_overruns() {
        let (jw, _jr) = fifo(4, 1);
        let (rw, _rr) = fifo(2, 1);
        let counters = DataPathCounters::default();
        let mut recorder = LatencyRecorder::new(jw, rw, 0, 0);

        recorder.on_input(&mut [1, 2, 3], 1, &counters);
        recorder.on_input(&mut [4, 5, 6], 1, &counters);
        assert_eq!(counters.jitter_overrun_frames.load(Ordering::Relaxed), 2);
        assert_eq!(counters.recording_overrun_frames.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_player_phases() {
        let (mut jw, jr) = fifo(64, 1);
        let counters = DataPathCounters::default();
        let trigger = Arc::new(ImpulseTrigger::new());
        let mut player = LatencyPlayer::new(jr, 6, Arc::from(vec![100i16]), trigger);

        // Silence for 6 frames, passthrough FIFO kept empty
        jw.write(&[1, 1, 1, 1]);
        let mut out = [7i16; 4];
        player.on_output(&mut out, 1, &counters);
        assert_eq!(out, [0; 4]);
        jw.write(&[2, 2, 2]);
        player.on_output(&mut out, 1, &counters);
        assert_eq!(out, [0; 4]);
        assert!(!player.is_steady());

        // Drain once
        jw.write(&[3, 3]);
        player.on_output(&mut out, 1, &counters);
        assert_eq!(out, [0; 4]);
        assert!(player.is_steady());
        assert_eq!(counters.drained_input_frames.load(Ordering::Relaxed), 2);

        // Passthrough
        jw.write(&[4, 5, 6, 7]);
        player.on_output(&mut out, 1, &counters);
        assert_eq!(out, [4, 5, 6, 7]);
    }

    #[test]
    fn test_player_underrun_plays_silence() {
        let (mut jw, jr) = fifo(64, 2);
        let counters = DataPathCounters::default();
        let mut player =
            LatencyPlayer::new(jr, 0, Arc::from(vec![1i16]), Arc::new(ImpulseTrigger::new()));
        let mut out = [9i16; 8];
        player.on_output(&mut out, 2, &counters);

        jw.write(&[1, 1, 2, 2]);
        player.on_output(&mut out, 2, &counters);
        assert_eq!(out, [0; 8]);
        assert_eq!(counters.player_underruns.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_player_discards_backlog() {
        let (mut jw, jr) = fifo(64, 1);
        let counters = DataPathCounters::default();
        let mut player =
            LatencyPlayer::new(jr, 0, Arc::from(vec![1i16]), Arc::new(ImpulseTrigger::new()));
        let mut out = [0i16; 4];
        player.on_output(&mut out, 1, &counters);

        // 10 frames queued: one buffer dropped, leaving fewer than two
        let queued: Vec<i16> = (1..=10).collect();
        jw.write(&queued);
        player.on_output(&mut out, 1, &counters);
        assert_eq!(counters.discarded_input_frames.load(Ordering::Relaxed), 4);
        assert_eq!(counters.repeat_discards.load(Ordering::Relaxed), 0);
        assert_eq!(counters.player_underruns.load(Ordering::Relaxed), 0);
        assert_eq!(out, [5, 6, 7, 8]);

        // A second backlog after an earlier one is flagged
        let queued: Vec<i16> = (11..=22).collect();
        jw.write(&queued);
        player.on_output(&mut out, 1, &counters);
        assert_eq!(counters.discarded_input_frames.load(Ordering::Relaxed), 12);
        assert_eq!(counters.repeat_discards.load(Ordering::Relaxed), 1);
        assert_eq!(out, [17, 18, 19, 20]);
    }

    #[test]
    fn test_impulse_spans_buffers_and_channels() {
        let (mut jw, jr) = fifo(64, 2);
        let counters = DataPathCounters::default();
        let trigger = Arc::new(ImpulseTrigger::new());
        let impulse: Arc<[Sample]> = Arc::from(vec![10i16, 20, 30, 40, 50]);
        let mut player = LatencyPlayer::new(jr, 0, impulse, Arc::clone(&trigger));
        let mut out = [0i16; 6];
        player.on_output(&mut out, 2, &counters);

        trigger.arm();
        jw.write(&[1, 1, 2, 2, 3, 3]);
        player.on_output(&mut out, 2, &counters);
        assert_eq!(out, [10, 10, 20, 20, 30, 30]);
        assert!(!trigger.is_armed());

        jw.write(&[4, 4, 5, 5, 6, 6]);
        player.on_output(&mut out, 2, &counters);
        assert_eq!(out, [40, 40, 50, 50, 0, 0]);

        jw.write(&[7, 7, 8, 8, 9, 9]);
        player.on_output(&mut out, 2, &counters);
        assert_eq!(out, [7, 7, 8, 8, 9, 9]);
        assert_eq!(counters.impulses.load(Ordering::Relaxed), 1);
    }
}
