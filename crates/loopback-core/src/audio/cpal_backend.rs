//! cpal-backed sound systems
//!
//! Opens the host's default output and input devices as `f32` streams. The
//! device callbacks go through [`super::device_buffer`] adapters, which
//! convert to and from the pipeline's `i16` samples in preallocated scratch
//! buffers and hand each device buffer to the engine in one call.
//!
//! The same type serves the platform default host and, with the `asio`
//! feature on Windows, the ASIO host.

use super::device_buffer::{InputAdapter, OutputAdapter};
use super::sample::Sample;
use super::sound_system::{
    Callbacks, DefaultSettings, InputCallback, PerformanceMode, SoundSystem, SoundSystemError,
    StreamParams,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, HostId, SampleRate, StreamConfig, SupportedBufferSize};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Input tap capacity in buffers when started without an input callback
const INPUT_TAP_BUFFERS: usize = 64;

/// Holds a `cpal::Stream` in a `Send` context
///
/// `cpal::Stream` is `!Send` on some platforms. The stream is created,
/// owned and dropped by the `CpalSoundSystem` that holds it, which is only
/// used through `&mut self`.
struct StreamHandle(cpal::Stream);

// SAFETY: the stream is never accessed concurrently; it is only dropped.
unsafe impl Send for StreamHandle {}

struct RunningStreams {
    running: Arc<AtomicBool>,
    output: StreamHandle,
    input: StreamHandle,
}

/// Sound system over a cpal host
pub struct CpalSoundSystem {
    host_id: HostId,
    label: &'static str,
    streams: Option<RunningStreams>,
    input_tap: Option<(HeapCons<Sample>, usize)>,
}

impl CpalSoundSystem {
    /// Binding over the platform default host
    pub fn default_host() -> Self {
        Self {
            host_id: cpal::default_host().id(),
            label: "default",
            streams: None,
            input_tap: None,
        }
    }

    /// Binding over the ASIO host
    #[cfg(all(feature = "asio", target_os = "windows"))]
    pub fn asio_host() -> Result<Self, SoundSystemError> {
        cpal::host_from_id(HostId::Asio)
            .map_err(|e| SoundSystemError::StreamError(format!("ASIO host unavailable: {e}")))?;
        Ok(Self {
            host_id: HostId::Asio,
            label: "asio",
            streams: None,
            input_tap: None,
        })
    }

    fn host(&self) -> Result<cpal::Host, SoundSystemError> {
        cpal::host_from_id(self.host_id)
            .map_err(|e| SoundSystemError::StreamError(format!("host unavailable: {e}")))
    }
}

/// Pick a buffer size from a supported range for `mode`
fn buffer_frames(size: &SupportedBufferSize, mode: PerformanceMode) -> Option<usize> {
    match size {
        SupportedBufferSize::Range { min, max } => Some(match mode {
            PerformanceMode::PowerSaving => *max as usize,
            PerformanceMode::None | PerformanceMode::LowLatency => *min as usize,
        }),
        SupportedBufferSize::Unknown => None,
    }
}

/// Stream config for `params`, asking for a fixed buffer size only when the
/// device reports it as supported
fn stream_config(params: &StreamParams, supported: &SupportedBufferSize) -> StreamConfig {
    let frames = params.frames_per_buffer as u32;
    let buffer_size = match supported {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => BufferSize::Default,
    };
    StreamConfig {
        channels: params.channels as u16,
        sample_rate: SampleRate(params.sample_rate),
        buffer_size,
    }
}

impl SoundSystem for CpalSoundSystem {
    fn name(&self) -> &'static str {
        self.label
    }

    fn probe_default_settings(
        &self,
        mode: PerformanceMode,
    ) -> Result<DefaultSettings, SoundSystemError> {
        let host = self.host()?;
        let output = host
            .default_output_device()
            .ok_or(SoundSystemError::NoDevice("output"))?;
        let input = host
            .default_input_device()
            .ok_or(SoundSystemError::NoDevice("input"))?;

        let output_config = output
            .default_output_config()
            .map_err(|e| SoundSystemError::StreamError(e.to_string()))?;
        let input_config = input
            .default_input_config()
            .map_err(|e| SoundSystemError::StreamError(e.to_string()))?;

        let unsupported = || SoundSystemError::Unsupported {
            backend: self.label,
            operation: "buffer size query",
        };
        let player_buffer_frames =
            buffer_frames(output_config.buffer_size(), mode).ok_or_else(unsupported)?;
        let recorder_buffer_frames =
            buffer_frames(input_config.buffer_size(), mode).ok_or_else(unsupported)?;

        let settings = DefaultSettings {
            sample_rate: output_config.sample_rate().0,
            player_buffer_frames,
            recorder_buffer_frames,
        };
        tracing::info!(backend = self.label, ?mode, ?settings, "Probed default settings");
        Ok(settings)
    }

    fn start(&mut self, params: &StreamParams, callbacks: Callbacks) -> Result<(), SoundSystemError> {
        if self.streams.is_some() {
            return Err(SoundSystemError::AlreadyStarted);
        }
        params.validate()?;

        let host = self.host()?;
        let output_device = host
            .default_output_device()
            .ok_or(SoundSystemError::NoDevice("output"))?;
        let input_device = host
            .default_input_device()
            .ok_or(SoundSystemError::NoDevice("input"))?;

        tracing::info!(
            backend = self.label,
            output = %output_device.name().unwrap_or_else(|_| "Unknown".to_string()),
            input = %input_device.name().unwrap_or_else(|_| "Unknown".to_string()),
            "Opening devices"
        );

        let output_config = output_device
            .default_output_config()
            .map(|c| stream_config(params, c.buffer_size()))
            .map_err(|e| SoundSystemError::StreamError(e.to_string()))?;
        let input_config = input_device
            .default_input_config()
            .map(|c| stream_config(params, c.buffer_size()))
            .map_err(|e| SoundSystemError::StreamError(e.to_string()))?;
        if output_config.buffer_size == BufferSize::Default {
            tracing::warn!(
                frames = params.frames_per_buffer,
                "Requested buffer size not supported, running on the device default"
            );
        }

        let running = Arc::new(AtomicBool::new(true));
        let Callbacks { output, input } = callbacks;

        let input = match input {
            Some(callback) => callback,
            None => {
                let rb = HeapRb::<Sample>::new(params.samples_per_buffer() * INPUT_TAP_BUFFERS);
                let (producer, consumer) = rb.split();
                self.input_tap = Some((consumer, params.channels));
                tap_callback(producer, params.channels)
            }
        };
        let output = OutputAdapter::new(output, params.frames_per_buffer, params.channels);
        let input = InputAdapter::new(input, params.frames_per_buffer, params.channels);

        let streams = build_output(&output_device, &output_config, output, &running)
            .and_then(|output_stream| {
                build_input(&input_device, &input_config, input, &running)
                    .map(|input_stream| (output_stream, input_stream))
            });
        let (output_stream, input_stream) = match streams {
            Ok(streams) => streams,
            Err(e) => {
                self.input_tap = None;
                return Err(SoundSystemError::StreamError(e.to_string()));
            }
        };

        let play = |stream: &cpal::Stream| {
            stream
                .play()
                .map_err(|e| SoundSystemError::StreamError(e.to_string()))
        };
        if let Err(e) = play(&input_stream).and_then(|_| play(&output_stream)) {
            running.store(false, Ordering::Relaxed);
            self.input_tap = None;
            return Err(e);
        }

        self.streams = Some(RunningStreams {
            running,
            output: StreamHandle(output_stream),
            input: StreamHandle(input_stream),
        });

        tracing::info!(
            backend = self.label,
            sample_rate = params.sample_rate,
            frames = params.frames_per_buffer,
            channels = params.channels,
            "Audio streams started"
        );
        Ok(())
    }

    fn read_input(&mut self, buffer: &mut [Sample]) -> Result<usize, SoundSystemError> {
        if self.streams.is_none() {
            return Err(SoundSystemError::NotStarted);
        }
        match self.input_tap.as_mut() {
            Some((consumer, channels)) => {
                let channels = *channels;
                let frames = (buffer.len() / channels).min(consumer.occupied_len() / channels);
                let popped = consumer.pop_slice(&mut buffer[..frames * channels]);
                Ok(popped / channels)
            }
            None => Ok(0),
        }
    }

    fn drain_input(&mut self) -> Result<(), SoundSystemError> {
        if self.streams.is_none() {
            return Err(SoundSystemError::NotStarted);
        }
        if let Some((consumer, _)) = self.input_tap.as_mut() {
            let drained = consumer.clear();
            tracing::debug!(drained, "Input tap drained");
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(streams) = self.streams.take() {
            streams.running.store(false, Ordering::Relaxed);
            let _ = streams.input.0.pause();
            let _ = streams.output.0.pause();
            drop(streams);
            tracing::info!(backend = self.label, "Audio streams stopped");
        }
        self.input_tap = None;
    }

    fn is_running(&self) -> bool {
        self.streams.is_some()
    }
}

impl Drop for CpalSoundSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Input callback feeding the pull-mode tap, dropping frames that do not fit
fn tap_callback(mut producer: HeapProd<Sample>, channels: usize) -> InputCallback {
    Box::new(move |samples: &mut [Sample]| {
        let frames = (producer.vacant_len() / channels).min(samples.len() / channels);
        producer.push_slice(&samples[..frames * channels]);
    })
}

fn build_output(
    device: &cpal::Device,
    config: &StreamConfig,
    mut adapter: OutputAdapter,
    running: &Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let running = Arc::clone(running);

    device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                data.fill(0.0);
                return;
            }
            adapter.render(data);
        },
        |err| {
            tracing::error!("Output stream error: {}", err);
        },
        None,
    )
}

fn build_input(
    device: &cpal::Device,
    config: &StreamConfig,
    mut adapter: InputAdapter,
    running: &Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let running = Arc::clone(running);

    device.build_input_stream(
        config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            adapter.capture(data);
        },
        |err| {
            tracing::error!("Input stream error: {}", err);
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_frames_from_range() {
        let range = SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(buffer_frames(&range, PerformanceMode::LowLatency), Some(64));
        assert_eq!(buffer_frames(&range, PerformanceMode::None), Some(64));
        assert_eq!(buffer_frames(&range, PerformanceMode::PowerSaving), Some(4096));
        assert_eq!(
            buffer_frames(&SupportedBufferSize::Unknown, PerformanceMode::None),
            None
        );
    }

    #[test]
    fn test_stream_config() {
        let params = StreamParams {
            sample_rate: 48000,
            frames_per_buffer: 256,
            channels: 2,
            performance_mode: PerformanceMode::LowLatency,
        };
        let range = SupportedBufferSize::Range { min: 64, max: 4096 };
        let fixed = stream_config(&params, &range);
        assert_eq!(fixed.channels, 2);
        assert_eq!(fixed.sample_rate, SampleRate(48000));
        assert_eq!(fixed.buffer_size, BufferSize::Fixed(256));

        let narrow = SupportedBufferSize::Range { min: 512, max: 1024 };
        assert_eq!(stream_config(&params, &narrow).buffer_size, BufferSize::Default);
        assert_eq!(
            stream_config(&params, &SupportedBufferSize::Unknown).buffer_size,
            BufferSize::Default
        );
    }

    #[test]
    fn test_default_host_probe() {
        // May fail on CI without audio devices, but shouldn't panic
        let system = CpalSoundSystem::default_host();
        match system.probe_default_settings(PerformanceMode::LowLatency) {
            Ok(settings) => println!("Default settings: {:?}", settings),
            Err(e) => println!("No audio devices available: {}", e),
        }
        assert!(!system.is_running());
    }
}
