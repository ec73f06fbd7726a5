//! Audio processing module
//!
//! This module contains the real-time side of the harness:
//! - Sample conversions ([`sample`])
//! - Lock-free SPSC frame FIFO ([`fifo`])
//! - Cross-boundary byte buffer ([`byte_buffer`])
//! - Recorder/player callback pair ([`engine`])
//! - Device buffer adapters between `f32` streams and the engine ([`device_buffer`])
//! - Platform bindings behind the [`sound_system::SoundSystem`] trait
//!   ([`echo`], and `cpal_backend` with the `hardware` feature)

pub mod byte_buffer;
#[cfg(feature = "hardware")]
pub mod cpal_backend;
pub mod device_buffer;
pub mod echo;
pub mod engine;
pub mod fifo;
pub mod sample;
pub mod sound_system;
