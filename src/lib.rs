//! Loopback - audio round-trip measurement harness
//!
//! This library re-exports the callback pipeline, statistics and session
//! API from `loopback-core` and adds the test runners used by the
//! `loopback` binary.

pub mod runner;

pub use loopback_core::{analysis, audio, config, session, stats, strategy};

pub use loopback_core::{
    BackendKind, Correlation, Direction, Fifo, FifoError, FifoReader, FifoWriter, LatencyEstimate,
    LoopbackConfig, Session, SessionError, SessionReport, SoundSystem, SoundSystemError,
    SoundSystemRegistry, StatsConfig, TestContext, TestType,
};
pub use loopback_core::{BUILD_DATE, DEFAULT_FRAMES_PER_BUFFER, DEFAULT_SAMPLE_RATE, VERSION};
