//! Callback timing statistics
//!
//! Each stream direction owns a [`StreamStats`]: the buffer-period histogram
//! and running moments plus the bounded late-callback log.

pub mod buffer_period;
pub mod timestamps;

pub use buffer_period::{BufferPeriodSnapshot, BufferPeriodStats, CAPTURE_RANK_MAX_RETRIES, RANGE};
pub use timestamps::{CallbackTimeStamps, LateCallback, LateCallbacks};

use crate::config::StatsConfig;
use serde::{Deserialize, Serialize};

/// Expected callback period in whole milliseconds
///
/// `round(frames * 1000 / sample_rate)`; 0 for a zero sample rate.
pub fn expected_buffer_period_ms(frames: usize, sample_rate: u32) -> u32 {
    if sample_rate == 0 {
        return 0;
    }
    (frames as f64 * 1000.0 / sample_rate as f64).round() as u32
}

/// Statistics for one stream direction
pub struct StreamStats {
    pub periods: BufferPeriodStats,
    pub late_callbacks: CallbackTimeStamps,
}

impl StreamStats {
    pub fn new(expected_period_ms: u32, max_late_callbacks: usize, config: StatsConfig) -> Self {
        Self {
            periods: BufferPeriodStats::new(expected_period_ms, config),
            late_callbacks: CallbackTimeStamps::new(max_late_callbacks),
        }
    }

    /// Record a callback happening now; call first thing in the callback
    #[inline]
    pub fn collect(&self, partner: Option<&StreamStats>) {
        self.periods
            .collect(partner.map(|p| &p.periods), &self.late_callbacks);
    }

    pub fn report(&self) -> StreamStatsReport {
        StreamStatsReport {
            periods: self.periods.snapshot(),
            late_callbacks: self.late_callbacks.snapshot(),
        }
    }
}

/// Serializable copy of one direction's statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatsReport {
    pub periods: BufferPeriodSnapshot,
    pub late_callbacks: LateCallbacks,
}
