//! Callback-driven audio engine
//!
//! Builds the recorder/player pair for a test:
//! - [`Recorder`] runs on the input callback thread
//! - [`Player`] runs on the output callback thread
//! - [`EngineHandles`] stays with the session: shared statistics, data-path
//!   counters and the recording collector
//!
//! Each callback first feeds its direction's buffer-period statistics, then
//! hands the buffer to the strategy for the running test. Bindings call
//! once per device callback with the whole device buffer, which may be
//! longer or shorter than the requested `frames_per_buffer`. The callbacks own
//! their FIFO halves, so stopping the streams (which drops the callbacks) is
//! what releases the FIFO storage.

use crate::audio::fifo::{Fifo, FifoError};
use crate::audio::sample::Sample;
use crate::audio::sound_system::{InputCallback, OutputCallback};
use crate::config::LoopbackConfig;
use crate::stats::StreamStats;
use crate::strategy::glitch::{GlitchRecorder, SineTone};
use crate::strategy::latency::{
    initial_silence_frames, ImpulseTrigger, LatencyPlayer, LatencyRecorder,
};
use crate::strategy::{DataPathCounters, ImpulseCountdown, RecordingCollector, TestContext, TestKind};
use std::sync::Arc;
use std::time::Duration;

/// Buffer-period statistics for both directions
pub struct EngineStats {
    pub recorder: StreamStats,
    pub player: StreamStats,
}

enum RecorderMode {
    Latency(LatencyRecorder),
    Glitch(GlitchRecorder),
}

enum PlayerMode {
    Latency(LatencyPlayer),
    Glitch(SineTone),
}

/// Input side of the engine
pub struct Recorder {
    channels: usize,
    stats: Arc<EngineStats>,
    counters: Arc<DataPathCounters>,
    mode: RecorderMode,
}

impl Recorder {
    /// Handle one device input buffer (interleaved, whole frames, any length)
    pub fn on_input_ready(&mut self, buffer: &mut [Sample]) {
        self.stats.recorder.collect(None);
        assert!(
            buffer.len() % self.channels == 0,
            "input buffer of {} samples is not a whole number of {}-channel frames",
            buffer.len(),
            self.channels
        );

        match &mut self.mode {
            RecorderMode::Latency(recorder) => {
                recorder.on_input(buffer, self.channels, &self.counters)
            }
            RecorderMode::Glitch(recorder) => {
                recorder.on_input(buffer, self.channels, &self.counters)
            }
        }
    }

    pub fn into_callback(mut self) -> InputCallback {
        Box::new(move |buffer: &mut [Sample]| self.on_input_ready(buffer))
    }
}

/// Output side of the engine
pub struct Player {
    channels: usize,
    stats: Arc<EngineStats>,
    counters: Arc<DataPathCounters>,
    mode: PlayerMode,
}

impl Player {
    /// Fill one device output buffer (interleaved, whole frames, any length)
    pub fn on_output_needed(&mut self, buffer: &mut [Sample]) {
        let stats = &*self.stats;
        stats.player.collect(Some(&stats.recorder));
        assert!(
            buffer.len() % self.channels == 0,
            "output buffer of {} samples is not a whole number of {}-channel frames",
            buffer.len(),
            self.channels
        );

        match &mut self.mode {
            PlayerMode::Latency(player) => player.on_output(buffer, self.channels, &self.counters),
            PlayerMode::Glitch(tone) => tone.fill(buffer, self.channels),
        }
    }

    pub fn into_callback(mut self) -> OutputCallback {
        Box::new(move |buffer: &mut [Sample]| self.on_output_needed(buffer))
    }
}

/// Session-side state shared with the callbacks
pub struct EngineHandles {
    pub stats: Arc<EngineStats>,
    pub counters: Arc<DataPathCounters>,
    pub collector: RecordingCollector,
    /// Impulse trigger of a latency test
    pub trigger: Option<Arc<ImpulseTrigger>>,
}

/// Build the recorder, player and session handles for `context`
pub fn build(
    context: TestContext,
    config: &LoopbackConfig,
) -> Result<(Recorder, Player, EngineHandles), FifoError> {
    let TestContext {
        frames_per_buffer,
        channels,
        sample_rate,
        kind,
        ..
    } = context;

    let expected_ms = crate::stats::expected_buffer_period_ms(frames_per_buffer, sample_rate);
    let stats = Arc::new(EngineStats {
        recorder: StreamStats::new(expected_ms, config.max_late_callbacks, config.stats),
        player: StreamStats::new(expected_ms, config.max_late_callbacks, config.stats),
    });
    let counters = Arc::new(DataPathCounters::default());

    let (recording_writer, recording_reader) =
        Fifo::<Sample>::new(config.recording_fifo_frames, channels)?.split();
    let collector = RecordingCollector::new(
        recording_reader,
        frames_per_buffer,
        config.collection_loops as usize,
        Duration::from_millis(config.collection_period_ms),
        Arc::clone(&counters),
    );

    let (recorder_mode, player_mode, collector, trigger) = match kind {
        TestKind::Latency(params) => {
            let (jitter_writer, jitter_reader) =
                Fifo::<Sample>::new(config.jitter_fifo_frames, channels)?.split();
            let trigger = Arc::new(ImpulseTrigger::new());
            let recorder = LatencyRecorder::new(
                jitter_writer,
                recording_writer,
                config.ignore_first_frames,
                params.input_frames_to_discard,
            );
            let player = LatencyPlayer::new(
                jitter_reader,
                initial_silence_frames(sample_rate),
                params.impulse,
                Arc::clone(&trigger),
            );
            let collector = collector.with_countdown(ImpulseCountdown::new(
                u64::from(config.impulse_delay_ms),
                config.collection_period_ms,
                Arc::clone(&trigger),
            ));
            (
                RecorderMode::Latency(recorder),
                PlayerMode::Latency(player),
                collector,
                Some(trigger),
            )
        }
        TestKind::Glitch(params) => {
            let recorder = GlitchRecorder::new(recording_writer, params.byte_buffer);
            let tone = SineTone::new(
                params.signal_frequency_hz,
                sample_rate,
                config.stats.glitch_injection,
            );
            (
                RecorderMode::Glitch(recorder),
                PlayerMode::Glitch(tone),
                collector,
                None,
            )
        }
    };

    tracing::debug!(
        frames_per_buffer,
        channels,
        sample_rate,
        expected_ms,
        latency = trigger.is_some(),
        "Engine built"
    );

    let recorder = Recorder {
        channels,
        stats: Arc::clone(&stats),
        counters: Arc::clone(&counters),
        mode: recorder_mode,
    };
    let player = Player {
        channels,
        stats: Arc::clone(&stats),
        counters: Arc::clone(&counters),
        mode: player_mode,
    };
    let handles = EngineHandles {
        stats,
        counters,
        collector,
        trigger,
    };
    Ok((recorder, player, handles))
}
