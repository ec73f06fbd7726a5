//! Bounded late-callback log
//!
//! Written only by the callback thread that owns it; read by the polling
//! thread through [`CallbackTimeStamps::snapshot`]. Entries are published by
//! a release store of the length, so a snapshot never observes a
//! half-written entry.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

const UNSET: u64 = u64::MAX;
const NANOS_PER_MILLI: u64 = 1_000_000;

/// One late callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateCallback {
    /// Milliseconds since the first callback, rounded up
    pub timestamp_ms: u32,
    /// Interval to the previous callback in milliseconds, rounded up
    pub duration_ms: u16,
}

/// Copy of the late-callback log at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateCallbacks {
    pub entries: Vec<LateCallback>,
    /// Set once a late callback arrived after the log was full
    pub exceeded_capacity: bool,
}

/// Append-only log of callbacks that arrived later than expected
pub struct CallbackTimeStamps {
    origin: Instant,
    /// Nanoseconds from `origin` to the first callback
    start_ns: AtomicU64,
    timestamps_ms: Box<[AtomicU32]>,
    durations_ms: Box<[AtomicU16]>,
    len: AtomicUsize,
    exceeded_capacity: AtomicBool,
}

impl CallbackTimeStamps {
    /// Create a log holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            origin: Instant::now(),
            start_ns: AtomicU64::new(UNSET),
            timestamps_ms: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            durations_ms: (0..capacity).map(|_| AtomicU16::new(0)).collect(),
            len: AtomicUsize::new(0),
            exceeded_capacity: AtomicBool::new(false),
        }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.timestamps_ms.len()
    }

    /// Number of recorded entries
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a late callback was dropped because the log was full
    pub fn exceeded_capacity(&self) -> bool {
        self.exceeded_capacity.load(Ordering::Acquire)
    }

    /// Remember `now` as the time of the first callback (first call wins)
    pub fn mark_start(&self, now: Instant) {
        if self.start_ns.load(Ordering::Relaxed) == UNSET {
            let _ = self.start_ns.compare_exchange(
                UNSET,
                self.nanos(now),
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }
    }

    /// Whether the first callback has been seen
    pub fn started(&self) -> bool {
        self.start_ns.load(Ordering::Relaxed) != UNSET
    }

    /// Record a late callback observed at `now` that took `duration_ns`
    ///
    /// Once the log is full, a further attempt only sets the sticky
    /// `exceeded_capacity` flag.
    pub fn record(&self, now: Instant, duration_ns: u64) {
        if self.exceeded_capacity.load(Ordering::Relaxed) {
            return;
        }
        let index = self.len.load(Ordering::Relaxed);
        if index >= self.capacity() {
            self.exceeded_capacity.store(true, Ordering::Release);
            return;
        }

        let start = match self.start_ns.load(Ordering::Relaxed) {
            UNSET => self.nanos(now),
            start => start,
        };
        let since_start = self.nanos(now).saturating_sub(start);

        self.timestamps_ms[index].store(
            round_up_ms(since_start).min(u32::MAX as u64) as u32,
            Ordering::Relaxed,
        );
        self.durations_ms[index].store(
            round_up_ms(duration_ns).min(u16::MAX as u64) as u16,
            Ordering::Relaxed,
        );
        self.len.store(index + 1, Ordering::Release);
    }

    /// Copy out the recorded entries
    pub fn snapshot(&self) -> LateCallbacks {
        let len = self.len();
        let entries = (0..len)
            .map(|i| LateCallback {
                timestamp_ms: self.timestamps_ms[i].load(Ordering::Relaxed),
                duration_ms: self.durations_ms[i].load(Ordering::Relaxed),
            })
            .collect();
        LateCallbacks {
            entries,
            exceeded_capacity: self.exceeded_capacity(),
        }
    }

    fn nanos(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_nanos() as u64
    }
}

/// Round a nanosecond duration up to whole milliseconds
#[inline]
pub fn round_up_ms(nanos: u64) -> u64 {
    nanos.div_ceil(NANOS_PER_MILLI)
}
