//! Buffer-period statistics
//!
//! Measures the interval between consecutive callbacks of one stream
//! direction. [`BufferPeriodStats::collect`] runs at the top of every
//! callback, so it only touches preallocated atomics: no allocation, no lock,
//! no I/O. All fields are written by the owning callback thread alone;
//! other threads read them (and clear the capture rank) at any time.

use super::timestamps::{round_up_ms, CallbackTimeStamps};
use crate::config::StatsConfig;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Histogram buckets: one per millisecond 0..=1000 plus an overflow bucket
pub const RANGE: usize = 1002;

/// Attempts at raising the capture rank before giving up on one update
pub const CAPTURE_RANK_MAX_RETRIES: usize = 16;

const NANOS_PER_MILLI: i64 = 1_000_000;
const UNSET: u64 = u64::MAX;

/// Copy of one direction's statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferPeriodSnapshot {
    /// Callback intervals per millisecond bucket, `RANGE` entries
    pub histogram: Vec<u32>,
    /// Longest interval seen in milliseconds
    pub max_period_ms: u32,
    /// Variance of the interval around the expected period in ns²
    pub variance_ns2: i64,
    /// Intervals measured after warm-up
    pub measurement_count: u64,
    /// Callbacks seen, warm-up included
    pub callback_count: u64,
}

/// Interval statistics for one stream direction
pub struct BufferPeriodStats {
    origin: Instant,
    expected_period_ms: u32,
    config: StatsConfig,
    histogram: Box<[AtomicU32]>,
    max_period_ms: AtomicU32,
    /// Sum of squared deviations from the expected period
    sdm: AtomicI64,
    variance: AtomicI64,
    measurement_count: AtomicU64,
    callback_count: AtomicU64,
    /// Nanoseconds from `origin` to the previous callback
    previous_ns: AtomicU64,
    capture_rank: AtomicI32,
}

impl BufferPeriodStats {
    /// Create statistics for callbacks expected every `expected_period_ms`
    pub fn new(expected_period_ms: u32, config: StatsConfig) -> Self {
        Self {
            origin: Instant::now(),
            expected_period_ms,
            config,
            histogram: (0..RANGE).map(|_| AtomicU32::new(0)).collect(),
            max_period_ms: AtomicU32::new(0),
            sdm: AtomicI64::new(0),
            variance: AtomicI64::new(0),
            measurement_count: AtomicU64::new(0),
            callback_count: AtomicU64::new(0),
            previous_ns: AtomicU64::new(UNSET),
            capture_rank: AtomicI32::new(0),
        }
    }

    /// Record a callback happening now
    ///
    /// `partner` is the other direction of a full-duplex pair; measurement
    /// waits until it is past its own warm-up.
    #[inline]
    pub fn collect(&self, partner: Option<&BufferPeriodStats>, log: &CallbackTimeStamps) {
        self.collect_at(Instant::now(), partner, log);
    }

    /// Record a callback happening at `now`
    pub fn collect_at(
        &self,
        now: Instant,
        partner: Option<&BufferPeriodStats>,
        log: &CallbackTimeStamps,
    ) {
        log.mark_start(now);

        let count = self.callback_count.load(Ordering::Relaxed) + 1;
        self.callback_count.store(count, Ordering::Relaxed);

        let now_ns = now.saturating_duration_since(self.origin).as_nanos() as u64;
        let previous = self.previous_ns.load(Ordering::Relaxed);
        let partner_ready = partner
            .map(|p| p.callback_count() > self.config.partner_discard as u64)
            .unwrap_or(true);

        if previous != UNSET && count > self.config.discard as u64 && partner_ready {
            let delta_ns = now_ns.saturating_sub(previous);
            if self.update(delta_ns) {
                log.record(now, delta_ns);
            }
        }

        self.previous_ns.store(now_ns, Ordering::Relaxed);
    }

    /// Fold one interval into the statistics; returns true for an outlier
    fn update(&self, delta_ns: u64) -> bool {
        let measurements = self.measurement_count.load(Ordering::Relaxed) + 1;
        self.measurement_count.store(measurements, Ordering::Relaxed);

        let ms = round_up_ms(delta_ns).min(u32::MAX as u64) as u32;
        if ms > self.max_period_ms.load(Ordering::Relaxed) {
            self.max_period_ms.store(ms, Ordering::Relaxed);
        }

        let bucket = (ms as usize).min(RANGE - 1);
        self.histogram[bucket].fetch_add(1, Ordering::Relaxed);

        let expected_ns = self.expected_period_ms as i64 * NANOS_PER_MILLI;
        let delta = (delta_ns.min(i64::MAX as u64) as i64).saturating_sub(expected_ns);
        let sdm = self
            .sdm
            .load(Ordering::Relaxed)
            .saturating_add(delta.saturating_mul(delta));
        self.sdm.store(sdm, Ordering::Relaxed);
        if measurements > 1 {
            self.variance
                .store(sdm / measurements as i64, Ordering::Relaxed);
        }

        let expected = self.expected_period_ms as u64;
        let ms = ms as u64;
        if ms > expected + self.config.capture_threshold_ms as u64 {
            self.raise_capture_rank((ms - expected).min(i32::MAX as u64) as i32);
        }
        ms > expected + self.config.outlier_threshold_ms as u64
    }

    /// Atomically raise the capture rank to `rank` if it is larger
    ///
    /// Bounded so a callback never spins indefinitely against a concurrent
    /// `take_capture_rank`.
    fn raise_capture_rank(&self, rank: i32) {
        let mut current = self.capture_rank.load(Ordering::Relaxed);
        for _ in 0..CAPTURE_RANK_MAX_RETRIES {
            if rank <= current {
                return;
            }
            match self.capture_rank.compare_exchange_weak(
                current,
                rank,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Read and clear the capture rank
    pub fn take_capture_rank(&self) -> i32 {
        self.capture_rank.swap(0, Ordering::AcqRel)
    }

    /// Callbacks seen so far, warm-up included
    pub fn callback_count(&self) -> u64 {
        self.callback_count.load(Ordering::Relaxed)
    }

    pub fn measurement_count(&self) -> u64 {
        self.measurement_count.load(Ordering::Relaxed)
    }

    pub fn max_period_ms(&self) -> u32 {
        self.max_period_ms.load(Ordering::Relaxed)
    }

    pub fn variance_ns2(&self) -> i64 {
        self.variance.load(Ordering::Relaxed)
    }

    pub fn expected_period_ms(&self) -> u32 {
        self.expected_period_ms
    }

    /// Copy of the histogram, `RANGE` buckets
    pub fn histogram(&self) -> Vec<u32> {
        self.histogram
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    pub fn snapshot(&self) -> BufferPeriodSnapshot {
        BufferPeriodSnapshot {
            histogram: self.histogram(),
            max_period_ms: self.max_period_ms(),
            variance_ns2: self.variance_ns2(),
            measurement_count: self.measurement_count(),
            callback_count: self.callback_count(),
        }
    }
}
