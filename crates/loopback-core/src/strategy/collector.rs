//! Poll-driven hand-off of the recording to the non-real-time side

use super::latency::ImpulseTrigger;
use super::{DataPathCounters, DataPathSnapshot};
use crate::audio::fifo::FifoReader;
use crate::audio::sample::{convert_to_f64, Sample};
use std::sync::Arc;
use std::time::Duration;

/// Counts down the impulse delay once per collection poll
#[derive(Debug)]
pub struct ImpulseCountdown {
    remaining_ms: i64,
    step_ms: i64,
    trigger: Arc<ImpulseTrigger>,
}

impl ImpulseCountdown {
    /// Arm `trigger` after `delay_ms`, counted in steps of `step_ms`
    pub fn new(delay_ms: u64, step_ms: u64, trigger: Arc<ImpulseTrigger>) -> Self {
        Self {
            remaining_ms: delay_ms as i64,
            step_ms: step_ms.max(1) as i64,
            trigger,
        }
    }

    /// Advance by one step; returns true on the step that arms the trigger
    ///
    /// The trigger is armed once the remaining delay is within one step.
    /// After that the countdown is spent and later ticks do nothing.
    pub fn tick(&mut self) -> bool {
        if self.remaining_ms <= 0 {
            return false;
        }
        if self.remaining_ms <= self.step_ms {
            self.trigger.arm();
            self.remaining_ms = -1;
            true
        } else {
            self.remaining_ms -= self.step_ms;
            false
        }
    }

    pub fn remaining_ms(&self) -> i64 {
        self.remaining_ms
    }

    /// Whether the trigger has been armed
    pub fn is_spent(&self) -> bool {
        self.remaining_ms < 0
    }
}

/// Drains the recording FIFO on the polling thread
pub struct RecordingCollector {
    reader: FifoReader<Sample>,
    chunk: Vec<Sample>,
    loops: usize,
    period: Duration,
    countdown: Option<ImpulseCountdown>,
    counters: Arc<DataPathCounters>,
    reported: DataPathSnapshot,
}

impl RecordingCollector {
    /// Collector reading `frames_per_buffer` frames at a time
    pub fn new(
        reader: FifoReader<Sample>,
        frames_per_buffer: usize,
        loops: usize,
        period: Duration,
        counters: Arc<DataPathCounters>,
    ) -> Self {
        let chunk = vec![0; frames_per_buffer.max(1) * reader.channel_count()];
        Self {
            reader,
            chunk,
            loops,
            period,
            countdown: None,
            counters,
            reported: DataPathSnapshot::default(),
        }
    }

    /// Count down the impulse delay while collecting
    pub fn with_countdown(mut self, countdown: ImpulseCountdown) -> Self {
        self.countdown = Some(countdown);
        self
    }

    pub fn countdown(&self) -> Option<&ImpulseCountdown> {
        self.countdown.as_ref()
    }

    /// Poll the recording for `loops` periods, converting into `dest`
    ///
    /// Samples are scaled to [-1.0, 1.0). Stops storing once `dest` is full;
    /// frames that do not fit stay queued. Returns the number of samples
    /// written.
    pub fn collect_recording(&mut self, dest: &mut [f64]) -> usize {
        let mut written = 0;
        for _ in 0..self.loops {
            std::thread::sleep(self.period);
            if let Some(countdown) = self.countdown.as_mut() {
                if countdown.tick() {
                    tracing::debug!("Impulse trigger armed");
                }
            }
            written += self.drain_into(&mut dest[written..]);
        }
        self.report_counters();
        written
    }

    fn drain_into(&mut self, dest: &mut [f64]) -> usize {
        let channels = self.reader.channel_count();
        let mut written = 0;
        loop {
            let room = (dest.len() - written) / channels * channels;
            let wanted = room.min(self.chunk.len());
            if wanted == 0 {
                break;
            }
            let frames = self.reader.read(&mut self.chunk[..wanted]);
            if frames == 0 {
                break;
            }
            written += convert_to_f64(&self.chunk[..frames * channels], &mut dest[written..]);
        }
        written
    }

    /// Throw away everything queued; returns the frames dropped
    pub fn discard_pending(&mut self) -> usize {
        self.reader.skip(usize::MAX)
    }

    /// Frames waiting in the recording FIFO
    pub fn pending_frames(&self) -> usize {
        self.reader.avail_to_read()
    }

    /// Log what the callbacks counted since the previous report
    fn report_counters(&mut self) {
        let now = self.counters.snapshot();
        let delta = now.since(&self.reported);
        self.reported = now;

        if delta.recording_overrun_frames > 0 || delta.jitter_overrun_frames > 0 {
            tracing::warn!(
                recording = delta.recording_overrun_frames,
                passthrough = delta.jitter_overrun_frames,
                "FIFO overrun, recorded frames dropped"
            );
        }
        if delta.player_underruns > 0 {
            tracing::warn!(buffers = delta.player_underruns, "Player underrun, silence substituted");
        }
        if delta.repeat_discards > 0 {
            tracing::warn!(
                count = delta.repeat_discards,
                total_frames = now.discarded_input_frames,
                "Input discarded more than once"
            );
        }
        if delta.discarded_input_frames > 0 || delta.drained_input_frames > 0 {
            tracing::debug!(
                discarded = delta.discarded_input_frames,
                drained = delta.drained_input_frames,
                "Passthrough backlog dropped"
            );
        }
        if delta.impulses > 0 {
            tracing::info!(impulses = now.impulses, "Impulse played");
        }
    }
}
