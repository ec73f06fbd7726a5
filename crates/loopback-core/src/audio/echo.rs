//! In-process loopback sound system
//!
//! Emulates a device whose output is wired straight back to its input: a
//! timer thread ticks once per buffer period, delivers the oldest looped
//! buffer to the input side, asks the output callback for a new buffer and
//! queues it behind a fixed delay. Useful for exercising the whole session
//! pipeline without audio hardware.

use super::fifo::{Fifo, FifoReader, FifoWriter};
use super::sample::Sample;
use super::sound_system::{
    Callbacks, InputCallback, OutputCallback, SoundSystem, SoundSystemError, StreamParams,
};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Buffers of delay between output and input by default
pub const DEFAULT_DELAY_BUFFERS: usize = 2;

/// Extra loop capacity beyond the delay, in buffers
const HEADROOM_BUFFERS: usize = 4;

struct EchoThread {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Sound system that loops output back to input in-process
pub struct EchoSoundSystem {
    delay_buffers: usize,
    thread: Option<EchoThread>,
    /// Looped input when started without an input callback
    input_tap: Option<FifoReader<Sample>>,
}

impl EchoSoundSystem {
    pub fn new() -> Self {
        Self::with_delay_buffers(DEFAULT_DELAY_BUFFERS)
    }

    /// Loop with `delay_buffers` buffers of silence queued ahead of the output
    pub fn with_delay_buffers(delay_buffers: usize) -> Self {
        Self {
            delay_buffers,
            thread: None,
            input_tap: None,
        }
    }

    pub fn delay_buffers(&self) -> usize {
        self.delay_buffers
    }
}

impl Default for EchoSoundSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundSystem for EchoSoundSystem {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn start(&mut self, params: &StreamParams, callbacks: Callbacks) -> Result<(), SoundSystemError> {
        if self.thread.is_some() {
            return Err(SoundSystemError::AlreadyStarted);
        }
        params.validate()?;

        let frames = params.frames_per_buffer;
        let capacity = (self.delay_buffers + HEADROOM_BUFFERS) * frames;
        let (mut loop_writer, loop_reader) = Fifo::<Sample>::new(capacity, params.channels)
            .map_err(|e| SoundSystemError::InvalidParams(e.to_string()))?
            .split();
        loop_writer.write(&vec![0; self.delay_buffers * params.samples_per_buffer()]);

        let Callbacks { output, input } = callbacks;
        let input = match input {
            Some(callback) => Some((callback, loop_reader)),
            None => {
                self.input_tap = Some(loop_reader);
                None
            }
        };

        let period = Duration::from_secs_f64(frames as f64 / params.sample_rate as f64);
        let samples = params.samples_per_buffer();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("echo-loopback".to_string())
            .spawn(move || {
                run_loop(period, samples, output, input, loop_writer, stop_rx);
            })
            .map_err(|e| SoundSystemError::StreamError(e.to_string()))?;

        self.thread = Some(EchoThread { stop_tx, handle });

        tracing::info!(
            sample_rate = params.sample_rate,
            frames,
            channels = params.channels,
            delay_buffers = self.delay_buffers,
            "Echo sound system started"
        );
        Ok(())
    }

    fn read_input(&mut self, buffer: &mut [Sample]) -> Result<usize, SoundSystemError> {
        match (&mut self.input_tap, &self.thread) {
            (Some(tap), _) => Ok(tap.read(buffer)),
            (None, Some(_)) => Ok(0),
            (None, None) => Err(SoundSystemError::NotStarted),
        }
    }

    fn drain_input(&mut self) -> Result<(), SoundSystemError> {
        match (&mut self.input_tap, &self.thread) {
            (Some(tap), _) => {
                let drained = tap.skip(usize::MAX);
                tracing::debug!(drained, "Echo input drained");
                Ok(())
            }
            (None, Some(_)) => Ok(()),
            (None, None) => Err(SoundSystemError::NotStarted),
        }
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.stop_tx.send(());
            if thread.handle.join().is_err() {
                tracing::error!("Echo loopback thread panicked");
            }
            tracing::info!("Echo sound system stopped");
        }
        self.input_tap = None;
    }

    fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for EchoSoundSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    period: Duration,
    samples: usize,
    mut output: OutputCallback,
    mut input: Option<(InputCallback, FifoReader<Sample>)>,
    mut loop_writer: FifoWriter<Sample>,
    stop_rx: crossbeam_channel::Receiver<()>,
) {
    let mut out_buf = vec![0 as Sample; samples];
    let mut in_buf = vec![0 as Sample; samples];
    let mut next = Instant::now() + period;

    loop {
        let wait = next.saturating_duration_since(Instant::now());
        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        next += period;

        if let Some((callback, reader)) = input.as_mut() {
            let channels = reader.channel_count();
            let read = reader.read(&mut in_buf);
            in_buf[read * channels..].fill(0);
            callback(&mut in_buf);
        }

        output(&mut out_buf);
        loop_writer.write(&out_buf);
    }
}
