//! Device buffer adapters
//!
//! Bridge between `f32` device buffers and the engine's `i16` callbacks.
//! Each device callback reaches the engine as a single call carrying the
//! whole device buffer, whatever its size relative to the requested
//! `frames_per_buffer`, so buffer-period statistics see one sample per
//! hardware callback and the latency strategy measures its backlog in
//! device buffers.
//!
//! Conversion goes through scratch storage allocated up front for
//! [`MAX_DEVICE_BUFFER_FRAMES`] frames. Longer device buffers are delivered
//! in several calls of that size.

use super::sample::{self, Sample};
use super::sound_system::{InputCallback, OutputCallback};

/// Largest device buffer handed to the engine in one call
pub const MAX_DEVICE_BUFFER_FRAMES: usize = 16384;

fn scratch(min_frames: usize, channels: usize) -> Vec<Sample> {
    vec![0 as Sample; min_frames.max(MAX_DEVICE_BUFFER_FRAMES) * channels.max(1)]
}

/// Renders device output buffers through an engine output callback
pub struct OutputAdapter {
    callback: OutputCallback,
    scratch: Vec<Sample>,
}

impl OutputAdapter {
    pub fn new(callback: OutputCallback, frames_per_buffer: usize, channels: usize) -> Self {
        Self {
            callback,
            scratch: scratch(frames_per_buffer, channels),
        }
    }

    /// Fill one device buffer
    pub fn render(&mut self, data: &mut [f32]) {
        for chunk in data.chunks_mut(self.scratch.len()) {
            let samples = &mut self.scratch[..chunk.len()];
            (self.callback)(samples);
            for (out, &s) in chunk.iter_mut().zip(samples.iter()) {
                *out = sample::to_f32(s);
            }
        }
    }
}

/// Feeds device input buffers to an engine input callback
pub struct InputAdapter {
    callback: InputCallback,
    scratch: Vec<Sample>,
}

impl InputAdapter {
    pub fn new(callback: InputCallback, frames_per_buffer: usize, channels: usize) -> Self {
        Self {
            callback,
            scratch: scratch(frames_per_buffer, channels),
        }
    }

    /// Deliver one device buffer
    pub fn capture(&mut self, data: &[f32]) {
        for chunk in data.chunks(self.scratch.len()) {
            let samples = &mut self.scratch[..chunk.len()];
            for (s, &x) in samples.iter_mut().zip(chunk.iter()) {
                *s = sample::from_f32(x);
            }
            (self.callback)(samples);
        }
    }
}
