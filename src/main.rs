//! Loopback - audio round-trip measurement harness
//!
//! Entry point for the command line front end.

use anyhow::{bail, Context, Result};
use loopback::runner::{run_buffer_period_test, run_latency_test};
use loopback::session::Direction;
use loopback::{LoopbackConfig, SessionReport, SoundSystemRegistry, TestType};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Options {
    backend: Option<String>,
    test_type: Option<TestType>,
    sample_rate: Option<u32>,
    frames: Option<usize>,
    seconds: Option<u64>,
    config: Option<PathBuf>,
    report: Option<PathBuf>,
}

enum Command {
    Run(Options),
    ListBackends,
    Version,
    Help,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loopback=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(Command::Run(options)) => options,
        Ok(Command::ListBackends) => {
            list_backends(&SoundSystemRegistry::with_builtin());
            return Ok(());
        }
        Ok(Command::Version) => {
            println!("loopback {} ({})", loopback::VERSION, loopback::BUILD_DATE);
            return Ok(());
        }
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            print_help();
            std::process::exit(2);
        }
    };

    let config = build_config(&options)?;
    let registry = SoundSystemRegistry::with_builtin();

    println!(
        "loopback {} - {} test on '{}' ({} Hz, {} frames, {} ch)",
        loopback::VERSION,
        config.test_type,
        config.backend,
        config.sample_rate,
        config.frames_per_buffer,
        config.channels
    );

    let report = match config.test_type {
        TestType::Latency => run_latency_test(&registry, &config)?,
        TestType::BufferPeriod => {
            let stop = Arc::new(AtomicBool::new(false));
            let handler_stop = Arc::clone(&stop);
            if let Err(e) = ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst)) {
                tracing::warn!(error = %e, "Ctrl+C handler not installed");
            }
            println!("Running for {} s. Press Ctrl+C to stop.", config.buffer_test_seconds);
            run_buffer_period_test(&registry, &config, &stop)?
        }
    };

    print_report(&report);

    if let Some(path) = &options.report {
        report
            .save(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{name} requires a value"))
        };
        match arg.as_str() {
            "--list-backends" | "-l" => return Ok(Command::ListBackends),
            "--version" | "-v" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            "--backend" | "-b" => options.backend = Some(value("--backend")?),
            "--test" | "-t" => options.test_type = Some(value("--test")?.parse()?),
            "--sample-rate" | "-r" => {
                let raw = value("--sample-rate")?;
                options.sample_rate =
                    Some(raw.parse().with_context(|| format!("Invalid sample rate: {raw}"))?);
            }
            "--frames" | "-f" => {
                let raw = value("--frames")?;
                options.frames =
                    Some(raw.parse().with_context(|| format!("Invalid frame count: {raw}"))?);
            }
            "--seconds" | "-s" => {
                let raw = value("--seconds")?;
                options.seconds =
                    Some(raw.parse().with_context(|| format!("Invalid duration: {raw}"))?);
            }
            "--config" | "-c" => options.config = Some(PathBuf::from(value("--config")?)),
            "--report" | "-o" => options.report = Some(PathBuf::from(value("--report")?)),
            other => bail!("Unknown argument: {other}"),
        }
    }
    Ok(Command::Run(options))
}

/// Config file (explicit path or default location) with command line overrides
fn build_config(options: &Options) -> Result<LoopbackConfig> {
    let mut config = match &options.config {
        Some(path) => LoopbackConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LoopbackConfig::load(),
    };

    if let Some(backend) = &options.backend {
        config.backend = backend.clone();
    }
    if let Some(test_type) = options.test_type {
        config.test_type = test_type;
    }
    if let Some(rate) = options.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(frames) = options.frames {
        config.frames_per_buffer = frames;
    }
    if let Some(seconds) = options.seconds {
        config.buffer_test_seconds = seconds;
    }

    config.validate().context("Invalid settings")?;
    Ok(config)
}

fn list_backends(registry: &SoundSystemRegistry) {
    println!("Available sound systems:");
    for (name, description) in registry.describe() {
        println!("  {name:<10} {description}");
    }
}

fn print_report(report: &SessionReport) {
    println!();
    if let Some(latency) = &report.latency {
        if latency.valid {
            println!(
                "Latency: {:.2} ms ({:.0} samples), confidence {:.0}%",
                latency.latency_ms,
                latency.latency_samples,
                latency.confidence * 100.0
            );
        } else {
            println!("Latency: not detected");
        }
    }

    println!("Expected buffer period: {} ms", report.expected_period_ms);
    for (direction, stats) in [
        (Direction::Recorder, &report.recorder),
        (Direction::Player, &report.player),
    ] {
        let periods = &stats.periods;
        println!(
            "{:?}: {} callbacks, max period {} ms, variance {:.3} ms², {} late{}",
            direction,
            periods.callback_count,
            periods.max_period_ms,
            periods.variance_ns2 as f64 / 1e12,
            stats.late_callbacks.entries.len(),
            if stats.late_callbacks.exceeded_capacity {
                " (log full)"
            } else {
                ""
            }
        );
        let buckets: Vec<String> = periods
            .histogram
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(ms, count)| format!("{ms}ms:{count}"))
            .collect();
        if !buckets.is_empty() {
            println!("  histogram {}", buckets.join(" "));
        }
    }

    let data_path = &report.data_path;
    println!(
        "Data path: {} recording overrun frames, {} underruns, {} discarded input frames",
        data_path.recording_overrun_frames,
        data_path.player_underruns,
        data_path.discarded_input_frames
    );
}

fn print_help() {
    println!("Usage: loopback [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -l, --list-backends      List available sound systems");
    println!("  -b, --backend NAME       Sound system to use (default: from config)");
    println!("  -t, --test TYPE          latency | buffer-period (default: latency)");
    println!("  -r, --sample-rate RATE   Sample rate in Hz");
    println!("  -f, --frames N           Frames per callback buffer");
    println!("  -s, --seconds N          Duration of a buffer-period test");
    println!("  -c, --config PATH        Config file (default: user config dir)");
    println!("  -o, --report PATH        Write a JSON report");
    println!("  -v, --version            Show version");
    println!("  -h, --help               Show this help");
    println!();
    println!("Examples:");
    println!("  loopback --backend echo --test latency");
    println!("  loopback -t buffer-period -s 60 -o report.json");
}
