//! Sound system bindings
//!
//! A [`SoundSystem`] owns a pair of platform audio streams and drives two
//! callbacks: the output callback fills a buffer to be played, the input
//! callback receives a recorded buffer. Callbacks run on the binding's
//! real-time threads and are dropped when the binding stops, which is what
//! guarantees that nothing touches the session's FIFOs after `stop()`.
//!
//! Bindings are created through a [`SoundSystemRegistry`] built once at
//! process start.

use super::sample::Sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by sound system bindings
#[derive(Error, Debug)]
pub enum SoundSystemError {
    #[error("Unknown sound system: {0}")]
    UnknownBackend(String),

    #[error("Sound system not available in this build: {0}")]
    BackendUnavailable(String),

    #[error("Operation not supported by {backend}: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("No {0} device available")]
    NoDevice(&'static str),

    #[error("Invalid stream parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Sound system already started")]
    AlreadyStarted,

    #[error("Sound system not started")]
    NotStarted,
}

/// Latency/power trade-off requested from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerformanceMode {
    /// Platform default
    #[default]
    None,
    LowLatency,
    PowerSaving,
}

/// Stream parameters shared by the output and input streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    /// Frames per callback buffer
    pub frames_per_buffer: usize,
    /// Interleaved channels per frame
    pub channels: usize,
    pub performance_mode: PerformanceMode,
}

impl StreamParams {
    /// Samples in one callback buffer
    pub fn samples_per_buffer(&self) -> usize {
        self.frames_per_buffer * self.channels
    }

    pub fn validate(&self) -> Result<(), SoundSystemError> {
        if self.sample_rate == 0 || self.frames_per_buffer == 0 || self.channels == 0 {
            return Err(SoundSystemError::InvalidParams(format!(
                "sample_rate={} frames_per_buffer={} channels={}",
                self.sample_rate, self.frames_per_buffer, self.channels
            )));
        }
        Ok(())
    }
}

/// Settings a device would pick by itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultSettings {
    pub sample_rate: u32,
    pub player_buffer_frames: usize,
    pub recorder_buffer_frames: usize,
}

/// Fills an output buffer of interleaved samples
pub type OutputCallback = Box<dyn FnMut(&mut [Sample]) + Send + 'static>;

/// Receives a recorded buffer of interleaved samples
pub type InputCallback = Box<dyn FnMut(&mut [Sample]) + Send + 'static>;

/// Callbacks handed to [`SoundSystem::start`]
///
/// Without an input callback the binding buffers recorded audio so it can
/// be pulled with [`SoundSystem::read_input`].
pub struct Callbacks {
    pub output: OutputCallback,
    pub input: Option<InputCallback>,
}

/// A platform audio binding
pub trait SoundSystem: Send {
    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    /// Query the device defaults for `mode`
    fn probe_default_settings(
        &self,
        _mode: PerformanceMode,
    ) -> Result<DefaultSettings, SoundSystemError> {
        Err(SoundSystemError::Unsupported {
            backend: self.name(),
            operation: "probe_default_settings",
        })
    }

    /// Open and start both streams
    ///
    /// On error no callback has been or will be invoked.
    fn start(&mut self, params: &StreamParams, callbacks: Callbacks) -> Result<(), SoundSystemError>;

    /// Copy buffered input into `buffer`, returning the frames read
    ///
    /// Only meaningful when started without an input callback; otherwise
    /// returns 0.
    fn read_input(&mut self, buffer: &mut [Sample]) -> Result<usize, SoundSystemError>;

    /// Discard all buffered input
    fn drain_input(&mut self) -> Result<(), SoundSystemError>;

    /// Stop both streams and drop the callbacks
    ///
    /// Idempotent. When this returns no callback is running.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Built-in bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process loopback: output is fed back as input after a fixed delay
    Echo,
    /// cpal default host
    Default,
    /// cpal ASIO host
    Asio,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Echo, BackendKind::Default, BackendKind::Asio];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Echo => "echo",
            BackendKind::Default => "default",
            BackendKind::Asio => "asio",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            BackendKind::Echo => "in-process loopback (no audio hardware)",
            BackendKind::Default => "platform default audio host",
            BackendKind::Asio => "ASIO host (Windows)",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Whether this build can create the binding
    pub fn is_available(self) -> bool {
        match self {
            BackendKind::Echo => true,
            BackendKind::Default => cfg!(feature = "hardware"),
            BackendKind::Asio => cfg!(all(feature = "asio", target_os = "windows")),
        }
    }

    /// Binding used when nothing is configured
    pub fn default_kind() -> Self {
        if BackendKind::Default.is_available() {
            BackendKind::Default
        } else {
            BackendKind::Echo
        }
    }

    fn create(self) -> Result<Box<dyn SoundSystem>, SoundSystemError> {
        match self {
            BackendKind::Echo => Ok(Box::new(super::echo::EchoSoundSystem::new())),
            #[cfg(feature = "hardware")]
            BackendKind::Default => Ok(Box::new(super::cpal_backend::CpalSoundSystem::default_host())),
            #[cfg(all(feature = "asio", target_os = "windows"))]
            BackendKind::Asio => Ok(Box::new(super::cpal_backend::CpalSoundSystem::asio_host()?)),
            #[allow(unreachable_patterns)]
            other => Err(SoundSystemError::BackendUnavailable(other.name().to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

type Factory = Box<dyn Fn() -> Result<Box<dyn SoundSystem>, SoundSystemError> + Send + Sync>;

struct RegistryEntry {
    name: String,
    description: String,
    factory: Factory,
}

/// Named sound system factories
///
/// Built once at start-up and passed by reference to session setup.
pub struct SoundSystemRegistry {
    entries: Vec<RegistryEntry>,
}

impl SoundSystemRegistry {
    /// Registry without any binding
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry with every built-in binding this build supports
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        for kind in BackendKind::ALL {
            if kind.is_available() {
                registry.register(kind.name(), kind.description(), move || kind.create());
            }
        }
        tracing::debug!(backends = ?registry.names(), "Sound system registry built");
        registry
    }

    /// Add (or replace) a binding under `name`
    pub fn register<F>(&mut self, name: &str, description: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn SoundSystem>, SoundSystemError> + Send + Sync + 'static,
    {
        self.entries.retain(|e| e.name != name);
        self.entries.push(RegistryEntry {
            name: name.to_string(),
            description: description.to_string(),
            factory: Box::new(factory),
        });
    }

    /// Registered binding names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// `(name, description)` pairs
    pub fn describe(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.description.as_str()))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Instantiate the binding registered as `name`
    pub fn create(&self, name: &str) -> Result<Box<dyn SoundSystem>, SoundSystemError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| match BackendKind::from_name(name) {
                Some(kind) => SoundSystemError::BackendUnavailable(kind.name().to_string()),
                None => SoundSystemError::UnknownBackend(name.to_string()),
            })?;
        (entry.factory)()
    }
}

impl Default for SoundSystemRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
