//! Test runners used by the command line front end

use anyhow::{Context, Result};
use loopback_core::analysis::{self, Correlation};
use loopback_core::audio::byte_buffer::SharedByteBuffer;
use loopback_core::audio::sample::Sample;
use loopback_core::strategy::latency::{calibration_burst, CALIBRATION_BURST_FRAMES};
use loopback_core::{Direction, LoopbackConfig, Session, SessionReport, SoundSystemRegistry, TestContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Interleaved samples one collection round produces
pub fn recording_samples(config: &LoopbackConfig) -> usize {
    let round_ms = u64::from(config.collection_loops) * config.collection_period_ms;
    (config.sample_rate as u64 * round_ms / 1000) as usize * config.channels
}

/// Run a latency test: play the calibration impulse, record one collection
/// round and estimate the round trip
pub fn run_latency_test(
    registry: &SoundSystemRegistry,
    config: &LoopbackConfig,
) -> Result<SessionReport> {
    let impulse: Arc<[Sample]> = Arc::from(calibration_burst(CALIBRATION_BURST_FRAMES));
    let context = TestContext::latency(config, impulse);
    let mut session = Session::start(registry, &config.backend, config, context)
        .with_context(|| format!("Failed to start latency test on '{}'", config.backend))?;

    let mut recording = vec![0.0; recording_samples(config)];
    let collected = session.collect_recording(&mut recording);
    session.stop();

    let mono = analysis::channel(&recording[..collected], config.channels, 0);
    let estimate = Correlation::default().estimate(&mono, config.sample_rate);
    if estimate.valid {
        info!(
            latency_ms = estimate.latency_ms,
            confidence = estimate.confidence,
            "Latency estimated"
        );
    } else {
        warn!(samples = collected, "No round trip found in the recording");
    }

    Ok(session.report(Some(estimate)))
}

/// Run a buffer-period test for `config.buffer_test_seconds` or until `stop`
/// is set
///
/// The recorder also streams into a host-side byte buffer that is drained
/// here, the way an embedding host would consume it.
pub fn run_buffer_period_test(
    registry: &SoundSystemRegistry,
    config: &LoopbackConfig,
    stop: &AtomicBool,
) -> Result<SessionReport> {
    let shared = SharedByteBuffer::new(config.byte_buffer_frames, config.channels)
        .context("Failed to allocate the host byte buffer")?;
    let mut host = SharedByteBuffer::reader(&shared);
    let context = TestContext::glitch(config, Some(SharedByteBuffer::view(&shared)));
    let mut session = Session::start(registry, &config.backend, config, context)
        .with_context(|| format!("Failed to start buffer-period test on '{}'", config.backend))?;

    let deadline = Instant::now() + Duration::from_secs(config.buffer_test_seconds);
    let mut recording = vec![0.0; recording_samples(config)];
    let mut host_frames = vec![0 as Sample; config.frames_per_buffer * config.channels];
    let mut host_total = 0u64;

    while Instant::now() < deadline && !stop.load(Ordering::SeqCst) {
        session.collect_recording(&mut recording);
        loop {
            let frames = host.read(&mut host_frames);
            if frames == 0 {
                break;
            }
            host_total += frames as u64;
        }

        info!(
            capture_rank = session.capture_rank(),
            recorder_max_ms = session.max_buffer_period_ms(Direction::Recorder),
            player_max_ms = session.max_buffer_period_ms(Direction::Player),
            host_frames = host_total,
            "Buffer-period progress"
        );
    }
    session.stop();

    if host.overruns() > 0 {
        warn!(
            overruns = host.overruns(),
            frames = host.overrun_frames(),
            "Host byte buffer reader fell behind"
        );
    }

    Ok(session.report(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_samples() {
        let config = LoopbackConfig {
            channels: 2,
            ..Default::default()
        };
        // 10 polls of 100 ms at 48 kHz stereo
        assert_eq!(recording_samples(&config), 96_000);
    }
}
