//! Loopback Core - Real-time audio callback pipeline and round-trip measurement
//!
//! This library drives an output and an input audio stream concurrently and
//! measures the loop between them. It provides the lock-free FIFO bridging
//! the two callback threads, buffer-period statistics collected inside the
//! callbacks, the latency (impulse) and buffer-period (tone) test
//! strategies, and autocorrelation-based latency estimation.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod session;
pub mod stats;
pub mod strategy;

pub use analysis::{Correlation, LatencyEstimate};
pub use audio::fifo::{Fifo, FifoError, FifoReader, FifoWriter};
pub use audio::sound_system::{BackendKind, SoundSystem, SoundSystemError, SoundSystemRegistry};
pub use config::{LoopbackConfig, StatsConfig, TestType};
pub use session::{Direction, Session, SessionError, SessionReport};
pub use strategy::TestContext;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date, set by the build script
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default frames per callback buffer (5 ms at 48 kHz)
pub const DEFAULT_FRAMES_PER_BUFFER: usize = 240;
