//! Measurement session
//!
//! A [`Session`] wires a test context to a sound system: it builds the
//! recorder/player pair, starts the binding with them as callbacks and keeps
//! the shared statistics, counters and recording collector for the polling
//! thread. Dropping a session stops the streams.

use crate::analysis::LatencyEstimate;
use crate::audio::byte_buffer::ByteBufferError;
use crate::audio::engine::{self, EngineHandles};
use crate::audio::fifo::FifoError;
use crate::audio::sound_system::{Callbacks, SoundSystem, SoundSystemError, SoundSystemRegistry};
use crate::config::{ConfigError, LoopbackConfig, TestType};
use crate::stats::{LateCallbacks, StreamStats, StreamStatsReport};
use crate::strategy::{DataPathSnapshot, TestContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that prevent a session from starting
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Sound system error: {0}")]
    SoundSystem(#[from] SoundSystemError),

    #[error("FIFO setup failed: {0}")]
    Fifo(#[from] FifoError),

    #[error("Byte buffer setup failed: {0}")]
    ByteBuffer(#[from] ByteBufferError),
}

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Input stream
    Recorder,
    /// Output stream
    Player,
}

/// A running measurement
pub struct Session {
    sound_system: Box<dyn SoundSystem>,
    backend: String,
    test_type: TestType,
    sample_rate: u32,
    frames_per_buffer: usize,
    channels: usize,
    expected_period_ms: u32,
    handles: EngineHandles,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Create the binding registered as `backend` and start `context` on it
    ///
    /// `config` supplies FIFO sizes, statistics thresholds and collection
    /// timing; stream geometry comes from `context`. On error no callback
    /// has run.
    pub fn start(
        registry: &SoundSystemRegistry,
        backend: &str,
        config: &LoopbackConfig,
        context: TestContext,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let params = context.stream_params();
        params.validate()?;

        let test_type = context.test_type();
        let expected_period_ms = context.expected_period_ms();
        let mut sound_system = registry.create(backend)?;

        let (recorder, player, handles) = engine::build(context, config)?;
        sound_system.start(
            &params,
            Callbacks {
                output: player.into_callback(),
                input: Some(recorder.into_callback()),
            },
        )?;

        tracing::info!(
            backend,
            test = %test_type,
            sample_rate = params.sample_rate,
            frames = params.frames_per_buffer,
            channels = params.channels,
            expected_period_ms,
            "Session started"
        );

        Ok(Self {
            sound_system,
            backend: backend.to_string(),
            test_type,
            sample_rate: params.sample_rate,
            frames_per_buffer: params.frames_per_buffer,
            channels: params.channels,
            expected_period_ms,
            handles,
            started_at: Utc::now(),
        })
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_per_buffer(&self) -> usize {
        self.frames_per_buffer
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_running(&self) -> bool {
        self.sound_system.is_running()
    }

    /// Poll the recording into `dest`; blocks for one collection round
    ///
    /// Returns the number of interleaved samples written.
    pub fn collect_recording(&mut self, dest: &mut [f64]) -> usize {
        self.handles.collector.collect_recording(dest)
    }

    fn stats(&self, direction: Direction) -> &StreamStats {
        match direction {
            Direction::Recorder => &self.handles.stats.recorder,
            Direction::Player => &self.handles.stats.player,
        }
    }

    /// Buffer-period histogram, one bucket per millisecond
    pub fn histogram(&self, direction: Direction) -> Vec<u32> {
        self.stats(direction).periods.histogram()
    }

    pub fn max_buffer_period_ms(&self, direction: Direction) -> u32 {
        self.stats(direction).periods.max_period_ms()
    }

    pub fn buffer_period_variance_ns2(&self, direction: Direction) -> i64 {
        self.stats(direction).periods.variance_ns2()
    }

    pub fn callback_count(&self, direction: Direction) -> u64 {
        self.stats(direction).periods.callback_count()
    }

    pub fn late_callbacks(&self, direction: Direction) -> LateCallbacks {
        self.stats(direction).late_callbacks.snapshot()
    }

    /// Worst recent excess over the expected period, cleared by this call
    ///
    /// Maximum over both directions; 0 when no callback was late enough.
    pub fn capture_rank(&self) -> i32 {
        let stats = &self.handles.stats;
        let recorder = stats.recorder.periods.take_capture_rank();
        let player = stats.player.periods.take_capture_rank();
        recorder.max(player)
    }

    /// Expected callback period in milliseconds
    pub fn expected_buffer_period_ms(&self) -> u32 {
        self.expected_period_ms
    }

    /// Data-path counters accumulated so far
    pub fn data_path(&self) -> DataPathSnapshot {
        self.handles.counters.snapshot()
    }

    /// Stop both streams; idempotent
    pub fn stop(&mut self) {
        if !self.sound_system.is_running() {
            return;
        }
        self.sound_system.stop();
        let counters = self.data_path();
        tracing::info!(
            backend = %self.backend,
            recorder_callbacks = self.callback_count(Direction::Recorder),
            player_callbacks = self.callback_count(Direction::Player),
            recording_overrun_frames = counters.recording_overrun_frames,
            player_underruns = counters.player_underruns,
            "Session stopped"
        );
    }

    /// Snapshot of everything measured, with an optional latency estimate
    pub fn report(&self, latency: Option<LatencyEstimate>) -> SessionReport {
        SessionReport {
            timestamp: Utc::now(),
            started_at: self.started_at,
            backend: self.backend.clone(),
            test_type: self.test_type,
            sample_rate: self.sample_rate,
            frames_per_buffer: self.frames_per_buffer,
            channels: self.channels,
            expected_period_ms: self.expected_period_ms,
            recorder: self.stats(Direction::Recorder).report(),
            player: self.stats(Direction::Player).report(),
            data_path: self.data_path(),
            latency,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serializable summary of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub backend: String,
    pub test_type: TestType,
    pub sample_rate: u32,
    pub frames_per_buffer: usize,
    pub channels: usize,
    pub expected_period_ms: u32,
    pub recorder: StreamStatsReport,
    pub player: StreamStatsReport,
    pub data_path: DataPathSnapshot,
    pub latency: Option<LatencyEstimate>,
}

impl SessionReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as JSON, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(path = %path.display(), "Report saved");
        Ok(())
    }
}
