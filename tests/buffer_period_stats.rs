//! Integration tests for the buffer-period statistics
//!
//! Callbacks are simulated with a synthetic clock through `collect_at`.

use loopback::stats::{BufferPeriodStats, CallbackTimeStamps, StreamStats, RANGE};
use loopback::StatsConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn run(stats: &BufferPeriodStats, log: &CallbackTimeStamps, gaps_ms: &[u64]) {
    let mut now = Instant::now();
    stats.collect_at(now, None, log);
    for &gap in gaps_ms {
        now += Duration::from_millis(gap);
        stats.collect_at(now, None, log);
    }
}

#[test]
fn test_warm_up_discards_ten_callbacks() {
    let stats = BufferPeriodStats::new(5, StatsConfig::default());
    let log = CallbackTimeStamps::new(16);
    run(&stats, &log, &[5; 9]);
    assert_eq!(stats.callback_count(), 10);
    assert_eq!(stats.measurement_count(), 0);
    assert!(stats.histogram().iter().all(|&c| c == 0));

    run(&stats, &log, &[]);
    assert_eq!(stats.measurement_count(), 1);
}

#[test]
fn test_fixed_spacing_fills_one_bucket() {
    let stats = BufferPeriodStats::new(5, StatsConfig::default());
    let log = CallbackTimeStamps::new(16);
    run(&stats, &log, &[5; 100]);

    let histogram = stats.histogram();
    assert_eq!(histogram.len(), RANGE);
    assert_eq!(histogram[5] as u64, stats.measurement_count());
    assert_eq!(histogram.iter().map(|&c| c as u64).sum::<u64>(), 91);
    assert_eq!(stats.max_period_ms(), 5);
    assert_eq!(stats.variance_ns2(), 0);
    assert!(log.is_empty());
    assert_eq!(stats.take_capture_rank(), 0);
}

#[test]
fn test_outliers_logged_until_capacity() {
    let stats = BufferPeriodStats::new(5, StatsConfig::default());
    let log = CallbackTimeStamps::new(2);
    let mut gaps = vec![5; 20];
    gaps.extend([12, 5, 7, 5, 30, 5]);
    run(&stats, &log, &gaps);

    let late = log.snapshot();
    assert_eq!(late.entries.len(), 2);
    assert_eq!(late.entries[0].duration_ms, 12);
    assert_eq!(late.entries[1].duration_ms, 7);
    assert!(late.exceeded_capacity);

    assert_eq!(stats.max_period_ms(), 30);
    // 30 ms against 5 expected
    assert_eq!(stats.take_capture_rank(), 25);
    assert_eq!(stats.take_capture_rank(), 0);
}

#[test]
fn test_long_gap_goes_to_overflow_bucket() {
    let stats = BufferPeriodStats::new(5, StatsConfig::default());
    let log = CallbackTimeStamps::new(4);
    let mut gaps = vec![5; 12];
    gaps.push(2500);
    run(&stats, &log, &gaps);
    assert_eq!(stats.histogram()[RANGE - 1], 1);
    assert_eq!(stats.max_period_ms(), 2500);
}

#[test]
fn test_player_waits_for_recorder() {
    let recorder = StreamStats::new(5, 8, StatsConfig::default());
    let player = StreamStats::new(5, 8, StatsConfig::default());
    let mut now = Instant::now();
    for _ in 0..20 {
        now += Duration::from_millis(5);
        player
            .periods
            .collect_at(now, Some(&recorder.periods), &player.late_callbacks);
    }
    assert_eq!(player.periods.measurement_count(), 0);

    for _ in 0..3 {
        recorder.periods.collect_at(now, None, &recorder.late_callbacks);
    }
    now += Duration::from_millis(5);
    player
        .periods
        .collect_at(now, Some(&recorder.periods), &player.late_callbacks);
    assert_eq!(player.periods.measurement_count(), 1);

    let report = player.report();
    assert_eq!(report.periods.callback_count, 21);
    assert_eq!(report.periods.histogram[5], 1);
}

#[test]
fn test_capture_rank_take_races_raise() {
    // Gaps of 10..=1000 ms against a 5 ms period raise the rank 5..=995
    const LAST_GAP_MS: u64 = 1000;
    let last_rank = (LAST_GAP_MS - 5) as i32;

    let stats = Arc::new(BufferPeriodStats::new(5, StatsConfig::default()));
    let done = Arc::new(AtomicBool::new(false));

    let taker = {
        let stats = Arc::clone(&stats);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut highest = 0;
            while !done.load(Ordering::Acquire) {
                let rank = stats.take_capture_rank();
                assert!((0..=last_rank).contains(&rank), "rank {rank}");
                highest = highest.max(rank);
                thread::yield_now();
            }
            highest
        })
    };

    let log = CallbackTimeStamps::new(8);
    let mut now = Instant::now();
    stats.collect_at(now, None, &log);
    for _ in 0..10 {
        now += Duration::from_millis(5);
        stats.collect_at(now, None, &log);
    }
    for gap in 10..=LAST_GAP_MS {
        now += Duration::from_millis(gap);
        stats.collect_at(now, None, &log);
        if gap % 32 == 0 {
            thread::yield_now();
        }
    }
    done.store(true, Ordering::Release);

    let taken = taker.join().unwrap();
    let remaining = stats.take_capture_rank();
    assert!(
        taken.max(remaining) >= last_rank - 1,
        "taken {taken}, remaining {remaining}"
    );
    assert_eq!(stats.take_capture_rank(), 0);
    assert_eq!(stats.max_period_ms(), LAST_GAP_MS as u32);
}
