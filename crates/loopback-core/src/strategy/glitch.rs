//! Buffer-period (glitch) test strategy
//!
//! The player emits a continuous sine tone; the recorder stores everything it
//! hears in the recording FIFO and, when the host supplied one, in the
//! cross-boundary buffer. Glitches show up as discontinuities in the
//! recording and as outliers in the buffer-period statistics.

use super::DataPathCounters;
use crate::audio::byte_buffer::ByteBufferView;
use crate::audio::fifo::FifoWriter;
use crate::audio::sample::Sample;
use std::f64::consts::TAU;

/// Peak amplitude of the tone relative to full scale
pub const TONE_AMPLITUDE: f64 = 0.8;

/// Phase-accumulator sine generator
#[derive(Debug, Clone)]
pub struct SineTone {
    phase: f64,
    increment: f64,
    sample_rate: u32,
    glitch_injection: bool,
    frame_count: u64,
}

impl SineTone {
    pub fn new(frequency_hz: f64, sample_rate: u32, glitch_injection: bool) -> Self {
        let increment = if sample_rate > 0 {
            TAU * frequency_hz / sample_rate as f64
        } else {
            0.0
        };
        Self {
            phase: 0.0,
            increment,
            sample_rate,
            glitch_injection,
            frame_count: 0,
        }
    }

    /// Current phase in radians, always within `[0, 2π)`
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Phase step per frame in radians
    pub fn increment(&self) -> f64 {
        self.increment
    }

    /// Fill `buffer` with the tone, same value on every channel of a frame
    pub fn fill(&mut self, buffer: &mut [Sample], channels: usize) {
        let full_scale = i16::MAX as f64 * TONE_AMPLITUDE;
        for frame in buffer.chunks_exact_mut(channels) {
            frame.fill((self.phase.sin() * full_scale) as Sample);

            self.phase += self.increment;
            // Injected discontinuity once a second
            if self.glitch_injection
                && self.sample_rate > 0
                && self.frame_count % self.sample_rate as u64 == 0
            {
                self.phase += self.increment;
            }
            self.frame_count += 1;
            while self.phase >= TAU {
                self.phase -= TAU;
            }
        }
    }
}

/// Input side of the glitch test
pub struct GlitchRecorder {
    recording: FifoWriter<Sample>,
    sink: Option<ByteBufferView<'static>>,
}

impl GlitchRecorder {
    pub fn new(recording: FifoWriter<Sample>, sink: Option<ByteBufferView<'static>>) -> Self {
        Self { recording, sink }
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn on_input(&mut self, buffer: &mut [Sample], channels: usize, counters: &DataPathCounters) {
        let frames = buffer.len() / channels;
        let written = self.recording.write(buffer);
        DataPathCounters::add(&counters.recording_overrun_frames, (frames - written) as u64);

        if let Some(sink) = self.sink.as_mut() {
            let written = sink.write(buffer, channels);
            DataPathCounters::add(&counters.byte_buffer_frames, written as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::byte_buffer::SharedByteBuffer;
    use crate::audio::fifo::Fifo;
    use approx::assert_relative_eq;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_tone_shape() {
        // Quarter-period step: 0, peak, 0, -peak
        let mut tone = SineTone::new(12_000.0, 48_000, false);
        let mut buffer = [0i16; 8];
        tone.fill(&mut buffer, 2);
        assert_eq!(buffer[0], 0);
        assert_eq!(buffer[1], 0);
        assert_eq!(buffer[2], 26213);
        assert_eq!(buffer[3], 26213);
        assert!(buffer[4].abs() <= 1);
        assert_eq!(buffer[6], -26213);
    }

    #[test]
    fn test_full_cycle_wraps_to_zero() {
        // Four quarter-cycle steps land exactly on 2π
        let mut tone = SineTone::new(12_000.0, 48_000, false);
        let mut buffer = [0i16; 4];
        tone.fill(&mut buffer, 1);
        assert_eq!(tone.phase(), 0.0);
    }

    #[test]
    fn test_phase_stays_wrapped() {
        let mut tone = SineTone::new(703.0, 48_000, false);
        let mut buffer = vec![0i16; 4800];
        for _ in 0..20 {
            tone.fill(&mut buffer, 1);
            assert!(tone.phase() >= 0.0 && tone.phase() < TAU);
        }
        assert_relative_eq!(tone.increment(), TAU * 703.0 / 48_000.0);
    }

    #[test]
    fn test_glitch_injection_skips_phase() {
        // One cycle per second at 8 Hz sampling: step of π/4, doubled on frame 0
        let mut clean = SineTone::new(1.0, 8, false);
        let mut glitchy = SineTone::new(1.0, 8, true);
        let mut a = [0i16; 1];
        let mut b = [0i16; 1];
        clean.fill(&mut a, 1);
        glitchy.fill(&mut b, 1);
        assert_eq!(a, b);
        assert_relative_eq!(glitchy.phase(), 2.0 * clean.phase(), epsilon = 1e-12);

        clean.fill(&mut a, 1);
        glitchy.fill(&mut b, 1);
        assert_relative_eq!(glitchy.phase() - clean.phase(), clean.increment(), epsilon = 1e-12);
    }

    #[test]
    fn test_recorder_writes_both_sinks() {
        let (writer, mut reader) = Fifo::<Sample>::new(8, 2).unwrap().split();
        let shared = SharedByteBuffer::new(4, 2).unwrap();
        let mut host = SharedByteBuffer::reader(&shared);
        let mut recorder = GlitchRecorder::new(writer, Some(SharedByteBuffer::view(&shared)));
        let counters = DataPathCounters::default();
        assert!(recorder.has_sink());

        recorder.on_input(&mut [1, 1, 2, 2, 3, 3], 2, &counters);
        assert_eq!(counters.byte_buffer_frames.load(Ordering::Relaxed), 3);
        assert_eq!(shared.rear(), 3);

        let mut out = [0i16; 6];
        assert_eq!(reader.read(&mut out), 3);
        assert_eq!(out, [1, 1, 2, 2, 3, 3]);
        assert_eq!(host.avail_to_read(), 3);
    }

    #[test]
    fn test_recorder_counts_recording_overrun() {
        let (writer, _reader) = Fifo::<Sample>::new(2, 1).unwrap().split();
        let mut recorder = GlitchRecorder::new(writer, None);
        let counters = DataPathCounters::default();
        recorder.on_input(&mut [1, 2, 3, 4, 5], 1, &counters);
        assert_eq!(counters.recording_overrun_frames.load(Ordering::Relaxed), 3);
        assert_eq!(counters.byte_buffer_frames.load(Ordering::Relaxed), 0);
    }
}
