//! Persistent measurement configuration
//!
//! Stores the stream parameters, test selection and statistics thresholds
//! in a JSON file at `<config_dir>/loopback/config.json`. Every field has a
//! default, so partial files load fine.

use crate::audio::sound_system::PerformanceMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which measurement a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestType {
    /// Impulse injection and round-trip latency estimation
    #[default]
    Latency,
    /// Continuous tone with long-run callback period statistics
    BufferPeriod,
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestType::Latency => write!(f, "latency"),
            TestType::BufferPeriod => write!(f, "buffer-period"),
        }
    }
}

impl std::str::FromStr for TestType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latency" => Ok(TestType::Latency),
            "buffer-period" | "glitch" => Ok(TestType::BufferPeriod),
            other => Err(ConfigError::Invalid(format!("unknown test type '{other}'"))),
        }
    }
}

fn default_discard() -> u32 {
    10
}

fn default_partner_discard() -> u32 {
    2
}

fn default_outlier_threshold_ms() -> u32 {
    1
}

fn default_capture_threshold_ms() -> u32 {
    4
}

/// Thresholds and warm-up counts of the buffer-period statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Callbacks ignored before intervals are measured
    #[serde(default = "default_discard")]
    pub discard: u32,
    /// Callbacks the full-duplex partner must have seen first
    #[serde(default = "default_partner_discard")]
    pub partner_discard: u32,
    /// Intervals longer than expected + this many ms are logged as late
    #[serde(default = "default_outlier_threshold_ms")]
    pub outlier_threshold_ms: u32,
    /// Intervals longer than expected + this many ms raise the capture rank
    #[serde(default = "default_capture_threshold_ms")]
    pub capture_threshold_ms: u32,
    /// Insert a phase jump into the test tone once per second
    #[serde(default)]
    pub glitch_injection: bool,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            discard: default_discard(),
            partner_discard: default_partner_discard(),
            outlier_threshold_ms: default_outlier_threshold_ms(),
            capture_threshold_ms: default_capture_threshold_ms(),
            glitch_injection: false,
        }
    }
}

fn default_backend() -> String {
    crate::audio::sound_system::BackendKind::default_kind()
        .name()
        .to_string()
}

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_frames_per_buffer() -> usize {
    crate::DEFAULT_FRAMES_PER_BUFFER
}

fn default_channels() -> usize {
    1
}

fn default_signal_frequency_hz() -> f64 {
    703.0
}

fn default_max_late_callbacks() -> usize {
    500
}

fn default_impulse_delay_ms() -> u32 {
    300
}

fn default_collection_loops() -> u32 {
    10
}

fn default_collection_period_ms() -> u64 {
    100
}

fn default_jitter_fifo_frames() -> usize {
    1024
}

fn default_recording_fifo_frames() -> usize {
    65536
}

fn default_byte_buffer_frames() -> usize {
    1 << 16
}

fn default_buffer_test_seconds() -> u64 {
    5
}

/// Persistent measurement configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopbackConfig {
    /// Sound system binding name (see `SoundSystemRegistry`)
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Frames per callback buffer
    #[serde(default = "default_frames_per_buffer")]
    pub frames_per_buffer: usize,
    /// Interleaved channels per frame
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default)]
    pub performance_mode: PerformanceMode,
    #[serde(default)]
    pub test_type: TestType,
    /// Tone frequency of the buffer-period test
    #[serde(default = "default_signal_frequency_hz")]
    pub signal_frequency_hz: f64,
    /// Input frames zeroed at the start of a latency test
    #[serde(default)]
    pub ignore_first_frames: usize,
    /// Late callbacks recorded per direction
    #[serde(default = "default_max_late_callbacks")]
    pub max_late_callbacks: usize,
    /// Delay before the impulse is emitted
    #[serde(default = "default_impulse_delay_ms")]
    pub impulse_delay_ms: u32,
    /// Polls per `collect_recording` call
    #[serde(default = "default_collection_loops")]
    pub collection_loops: u32,
    /// Sleep between polls
    #[serde(default = "default_collection_period_ms")]
    pub collection_period_ms: u64,
    /// Capacity of the player's passthrough FIFO
    #[serde(default = "default_jitter_fifo_frames")]
    pub jitter_fifo_frames: usize,
    /// Capacity of the recording FIFO
    #[serde(default = "default_recording_fifo_frames")]
    pub recording_fifo_frames: usize,
    /// Frames of the host-side byte buffer of buffer-period sessions
    #[serde(default = "default_byte_buffer_frames")]
    pub byte_buffer_frames: usize,
    /// Duration of a buffer-period run
    #[serde(default = "default_buffer_test_seconds")]
    pub buffer_test_seconds: u64,
    #[serde(default)]
    pub stats: StatsConfig,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sample_rate: default_sample_rate(),
            frames_per_buffer: default_frames_per_buffer(),
            channels: default_channels(),
            performance_mode: PerformanceMode::default(),
            test_type: TestType::default(),
            signal_frequency_hz: default_signal_frequency_hz(),
            ignore_first_frames: 0,
            max_late_callbacks: default_max_late_callbacks(),
            impulse_delay_ms: default_impulse_delay_ms(),
            collection_loops: default_collection_loops(),
            collection_period_ms: default_collection_period_ms(),
            jitter_fifo_frames: default_jitter_fifo_frames(),
            recording_fifo_frames: default_recording_fifo_frames(),
            byte_buffer_frames: default_byte_buffer_frames(),
            buffer_test_seconds: default_buffer_test_seconds(),
            stats: StatsConfig::default(),
        }
    }
}

impl LoopbackConfig {
    /// Config file path: `<config_dir>/loopback/config.json`
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loopback")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        let path = Self::path();
        match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config from disk");
                config
            }
            Err(ConfigError::Io { .. }) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Load and validate config from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Reject values no session can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.frames_per_buffer == 0 {
            return Err(ConfigError::Invalid(
                "frames_per_buffer must be positive".into(),
            ));
        }
        if self.channels == 0 {
            return Err(ConfigError::Invalid("channels must be positive".into()));
        }
        if !(self.signal_frequency_hz > 0.0
            && self.signal_frequency_hz < self.sample_rate as f64 / 2.0)
        {
            return Err(ConfigError::Invalid(format!(
                "signal_frequency_hz {} must lie between 0 and Nyquist",
                self.signal_frequency_hz
            )));
        }
        if self.jitter_fifo_frames < 2 * self.frames_per_buffer {
            return Err(ConfigError::Invalid(
                "jitter_fifo_frames must hold at least two buffers".into(),
            ));
        }
        if self.recording_fifo_frames < self.frames_per_buffer {
            return Err(ConfigError::Invalid(
                "recording_fifo_frames must hold at least one buffer".into(),
            ));
        }
        Ok(())
    }

    /// Expected callback period in milliseconds
    pub fn expected_period_ms(&self) -> u32 {
        crate::stats::expected_buffer_period_ms(self.frames_per_buffer, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoopbackConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.frames_per_buffer, 240);
        assert_eq!(config.channels, 1);
        assert_eq!(config.test_type, TestType::Latency);
        assert_eq!(config.impulse_delay_ms, 300);
        assert_eq!(config.stats.discard, 10);
        assert_eq!(config.stats.partner_discard, 2);
        assert!(!config.stats.glitch_injection);
        assert!(config.validate().is_ok());
        assert_eq!(config.expected_period_ms(), 5);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"sample_rate": 44100, "stats": {"capture_threshold_ms": 8}}"#;
        let config: LoopbackConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.frames_per_buffer, 240);
        assert_eq!(config.stats.capture_threshold_ms, 8);
        assert_eq!(config.stats.outlier_threshold_ms, 1);
    }

    #[test]
    fn test_test_type_names() {
        let json = r#"{"test_type": "buffer-period"}"#;
        let config: LoopbackConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.test_type, TestType::BufferPeriod);
        assert_eq!("latency".parse::<TestType>().unwrap(), TestType::Latency);
        assert_eq!("glitch".parse::<TestType>().unwrap(), TestType::BufferPeriod);
        assert!("nope".parse::<TestType>().is_err());
        assert_eq!(TestType::BufferPeriod.to_string(), "buffer-period");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LoopbackConfig::default();
        config.channels = 0;
        assert!(config.validate().is_err());

        let mut config = LoopbackConfig::default();
        config.signal_frequency_hz = 30_000.0;
        assert!(config.validate().is_err());

        let mut config = LoopbackConfig::default();
        config.jitter_fifo_frames = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = LoopbackConfig {
            backend: "echo".to_string(),
            sample_rate: 96000,
            channels: 2,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = LoopbackConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_from_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            LoopbackConfig::load_from(&missing),
            Err(ConfigError::Io { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            LoopbackConfig::load_from(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }
}
