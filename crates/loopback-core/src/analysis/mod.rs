//! Offline analysis of collected recordings

pub mod correlation;

pub use correlation::{Correlation, LatencyEstimate};

/// Extract channel `index` from interleaved samples
pub fn channel(interleaved: &[f64], channels: usize, index: usize) -> Vec<f64> {
    if channels == 0 || index >= channels {
        return Vec::new();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame[index])
        .collect()
}
