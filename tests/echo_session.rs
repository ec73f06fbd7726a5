//! End-to-end tests over the in-process echo sound system
//!
//! The echo binding feeds every output buffer back as input two buffers
//! later, so the full recorder/player/collector pipeline runs on real
//! threads without audio hardware.

use approx::assert_abs_diff_eq;
use loopback::audio::echo::EchoSoundSystem;
use loopback::runner::{run_buffer_period_test, run_latency_test};
use loopback::session::Direction;
use loopback::{LoopbackConfig, Session, SoundSystemRegistry, TestContext, TestType};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn echo_config(test_type: TestType) -> LoopbackConfig {
    LoopbackConfig {
        backend: "echo".into(),
        test_type,
        ..Default::default()
    }
}

#[test]
fn test_latency_round_trip_on_echo() {
    let registry = SoundSystemRegistry::with_builtin();
    let config = echo_config(TestType::Latency);
    let report = run_latency_test(&registry, &config).unwrap();

    assert_eq!(report.test_type, TestType::Latency);
    assert_eq!(report.data_path.impulses, 1);
    let latency = report.latency.expect("latency estimate");
    assert!(latency.valid, "{latency:?}");
    // Two 5 ms buffers of loop delay
    assert_abs_diff_eq!(latency.latency_ms, 10.0, epsilon = 1.0);
}

#[test]
fn test_impulse_counts_down_in_collection() {
    let registry = SoundSystemRegistry::with_builtin();
    let config = LoopbackConfig {
        collection_loops: 2,
        ..echo_config(TestType::Latency)
    };
    let context = TestContext::latency(&config, Arc::from(vec![i16::MAX; 4]));
    let mut session = Session::start(&registry, "echo", &config, context).unwrap();

    let mut dest = vec![0.0; 48_000];
    session.collect_recording(&mut dest);
    // 300 ms delay, 100 ms per poll: armed on the third poll
    assert_eq!(session.data_path().impulses, 0);
    session.collect_recording(&mut dest);
    // Give the player time to pick up the trigger
    session.collect_recording(&mut dest);
    session.stop();
    assert_eq!(session.data_path().impulses, 1);
}

#[test]
fn test_buffer_period_run_on_echo() {
    let registry = SoundSystemRegistry::with_builtin();
    let config = LoopbackConfig {
        buffer_test_seconds: 1,
        ..echo_config(TestType::BufferPeriod)
    };
    let stop = AtomicBool::new(false);
    let report = run_buffer_period_test(&registry, &config, &stop).unwrap();

    assert_eq!(report.test_type, TestType::BufferPeriod);
    assert!(report.player.periods.callback_count > 100);
    assert!(report.recorder.periods.measurement_count > 0);
    assert!(report.data_path.byte_buffer_frames > 0);
    assert_eq!(report.latency, None);
}

#[test]
fn test_custom_registry_binding() {
    let mut registry = SoundSystemRegistry::empty();
    registry.register("slow-echo", "echo with extra delay", || {
        Ok(Box::new(EchoSoundSystem::with_delay_buffers(6)))
    });
    assert_eq!(registry.names(), vec!["slow-echo"]);

    let config = LoopbackConfig {
        backend: "slow-echo".into(),
        jitter_fifo_frames: 4096,
        ..Default::default()
    };
    let report = run_latency_test(&registry, &config).unwrap();
    let latency = report.latency.expect("latency estimate");
    assert_abs_diff_eq!(latency.latency_ms, 30.0, epsilon = 1.0);
}

#[test]
fn test_session_queries_while_running() {
    let registry = SoundSystemRegistry::with_builtin();
    let config = LoopbackConfig {
        collection_loops: 3,
        ..echo_config(TestType::BufferPeriod)
    };
    let context = TestContext::glitch(&config, None);
    let mut session = Session::start(&registry, "echo", &config, context).unwrap();

    let mut dest = vec![0.0; 48_000];
    session.collect_recording(&mut dest);
    assert!(session.is_running());
    assert!(session.callback_count(Direction::Recorder) > 0);
    assert_eq!(session.expected_buffer_period_ms(), 5);
    assert!(session.capture_rank() >= 0);
    let late = session.late_callbacks(Direction::Player);
    assert!(late.entries.len() <= config.max_late_callbacks);
    drop(session);
}
