//! Test context: stream geometry plus the per-test payload

use crate::audio::byte_buffer::ByteBufferView;
use crate::audio::sample::Sample;
use crate::audio::sound_system::{PerformanceMode, StreamParams};
use crate::config::{LoopbackConfig, TestType};
use std::sync::Arc;

/// Parameters of a latency test
#[derive(Debug, Clone)]
pub struct LatencyParams {
    /// Input frames dropped before anything is recorded
    pub input_frames_to_discard: usize,
    /// Mono calibration waveform, duplicated to every channel when played
    pub impulse: Arc<[Sample]>,
}

/// Parameters of a buffer-period (glitch) test
#[derive(Debug)]
pub struct GlitchParams {
    /// Frequency of the generated tone
    pub signal_frequency_hz: f64,
    /// Host region receiving every recorded frame, if any
    pub byte_buffer: Option<ByteBufferView<'static>>,
}

/// Test-specific payload
#[derive(Debug)]
pub enum TestKind {
    Latency(LatencyParams),
    Glitch(GlitchParams),
}

impl TestKind {
    pub fn test_type(&self) -> TestType {
        match self {
            TestKind::Latency(_) => TestType::Latency,
            TestKind::Glitch(_) => TestType::BufferPeriod,
        }
    }
}

/// Everything a session needs to know about the test it runs
#[derive(Debug)]
pub struct TestContext {
    pub frames_per_buffer: usize,
    pub channels: usize,
    pub sample_rate: u32,
    pub performance_mode: PerformanceMode,
    pub kind: TestKind,
}

impl TestContext {
    /// Context using the stream settings of `config`
    pub fn from_config(config: &LoopbackConfig, kind: TestKind) -> Self {
        Self {
            frames_per_buffer: config.frames_per_buffer,
            channels: config.channels,
            sample_rate: config.sample_rate,
            performance_mode: config.performance_mode,
            kind,
        }
    }

    pub fn latency(config: &LoopbackConfig, impulse: Arc<[Sample]>) -> Self {
        Self::from_config(
            config,
            TestKind::Latency(LatencyParams {
                input_frames_to_discard: 0,
                impulse,
            }),
        )
    }

    pub fn glitch(config: &LoopbackConfig, byte_buffer: Option<ByteBufferView<'static>>) -> Self {
        Self::from_config(
            config,
            TestKind::Glitch(GlitchParams {
                signal_frequency_hz: config.signal_frequency_hz,
                byte_buffer,
            }),
        )
    }

    pub fn test_type(&self) -> TestType {
        self.kind.test_type()
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.frames_per_buffer * self.channels
    }

    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            frames_per_buffer: self.frames_per_buffer,
            channels: self.channels,
            performance_mode: self.performance_mode,
        }
    }

    /// Expected callback period in milliseconds
    pub fn expected_period_ms(&self) -> u32 {
        crate::stats::expected_buffer_period_ms(self.frames_per_buffer, self.sample_rate)
    }
}
