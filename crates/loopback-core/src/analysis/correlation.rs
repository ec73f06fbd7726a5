//! Round-trip latency estimation by autocorrelation
//!
//! The latency test leaves an impulse circulating through the loop, so the
//! recording contains the impulse once per round trip. The recording's
//! envelope is reduced to a fixed number of blocks, autocorrelated, and the
//! strongest lag beyond a minimum plausible latency is taken as the round
//! trip.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

/// Default number of envelope blocks
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Smallest accepted block size
pub const MIN_BLOCK_SIZE: usize = 2048;

/// Largest accepted block size
pub const MAX_BLOCK_SIZE: usize = 8192;

/// Samples quieter than this (-60 dB) do not count toward the envelope
pub const AMPLITUDE_THRESHOLD: f64 = 0.001;

/// Lags shorter than this are not considered
pub const MIN_LATENCY_MS: f64 = 8.0;

const CONFIDENCE_FACTOR: f64 = 3.0;

/// Result of a latency estimation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyEstimate {
    /// Estimated round trip in samples (fractional: block index times block width)
    pub latency_samples: f64,
    /// Estimated round trip in milliseconds
    pub latency_ms: f64,
    /// Confidence of the estimate (0.0 to 1.0)
    pub confidence: f64,
    /// Mean of the correlation beyond the minimum lag
    pub average: f64,
    /// RMS of the correlation beyond the minimum lag
    pub rms: f64,
    /// Whether a positive latency was found
    pub valid: bool,
}

/// Autocorrelation-based latency estimator
pub struct Correlation {
    block_size: usize,
    fft_planner: FftPlanner<f64>,
}

impl Correlation {
    /// Create an estimator; `block_size` is clamped to the accepted range
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE),
            fft_planner: FftPlanner::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Estimate the round-trip latency of `data` recorded at `sample_rate`
    pub fn estimate(&mut self, data: &[f64], sample_rate: u32) -> LatencyEstimate {
        if data.is_empty() || sample_rate == 0 {
            return LatencyEstimate::default();
        }

        let envelope = downsample(data, self.block_size, AMPLITUDE_THRESHOLD);
        let correlation = self.autocorrelation(&envelope);

        let group_size = data.len() as f64 / self.block_size as f64;
        let min_index =
            (0.5 + MIN_LATENCY_MS * sample_rate as f64 / (group_size * 1000.0)) as usize;

        let mut max_value = 0.0;
        let mut max_index = None;
        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        for (i, &value) in correlation.iter().enumerate().skip(min_index) {
            sum += value;
            sum_squares += value * value;
            if value > max_value {
                max_value = value;
                max_index = Some(i);
            }
        }

        let len = correlation.len() as f64;
        let rms = (sum_squares / len).sqrt();
        let average = sum / len;
        let confidence = if average > 0.0 {
            ((rms - average) / (CONFIDENCE_FACTOR * average)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let latency_samples = max_index.map_or(0.0, |i| i as f64 * group_size);
        let latency_ms = latency_samples * 1000.0 / sample_rate as f64;

        tracing::debug!(
            samples = data.len(),
            block_size = self.block_size,
            min_index,
            max_index = max_index.unwrap_or(0),
            max_value,
            average,
            rms,
            confidence,
            latency_ms,
            "Autocorrelation done"
        );

        LatencyEstimate {
            latency_samples,
            latency_ms,
            confidence,
            average,
            rms,
            valid: latency_ms > 0.0001,
        }
    }

    /// Linear (non-circular) autocorrelation normalized by the signal energy
    ///
    /// All zeros for a silent input.
    fn autocorrelation(&mut self, data: &[f64]) -> Vec<f64> {
        let n = data.len();
        let energy: f64 = data.iter().map(|x| x * x).sum();
        if energy <= 0.0 {
            return vec![0.0; n];
        }

        let fft_size = (n * 2).next_power_of_two();
        let mut spectrum: Vec<Complex<f64>> = data
            .iter()
            .map(|&x| Complex::new(x, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(fft_size)
            .collect();

        let fft = self.fft_planner.plan_fft_forward(fft_size);
        fft.process(&mut spectrum);
        for bin in spectrum.iter_mut() {
            *bin = Complex::new(bin.norm_sqr(), 0.0);
        }
        let ifft = self.fft_planner.plan_fft_inverse(fft_size);
        ifft.process(&mut spectrum);

        let norm = 1.0 / (fft_size as f64 * energy);
        spectrum[..n].iter().map(|c| c.re * norm).collect()
    }
}

impl Default for Correlation {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

/// Sum of absolute values above `threshold` per block of `data`
fn downsample(data: &[f64], block_size: usize, threshold: f64) -> Vec<f64> {
    let mut blocks = vec![0.0; block_size];
    let group_size = data.len() as f64 / block_size as f64;

    let mut index = 0;
    let mut next_group = group_size;
    for (i, &sample) in data.iter().enumerate() {
        if i as f64 > next_group {
            index += 1;
            next_group += group_size;
        }
        if index >= block_size {
            break;
        }
        let value = sample.abs();
        if value >= threshold {
            blocks[index] += value;
        }
    }
    blocks
}
