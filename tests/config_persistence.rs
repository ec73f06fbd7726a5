//! Integration tests for config persistence

use loopback::config::ConfigError;
use loopback::{LoopbackConfig, StatsConfig, TestType};

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let config = LoopbackConfig {
        backend: "echo".into(),
        sample_rate: 44_100,
        frames_per_buffer: 441,
        channels: 2,
        test_type: TestType::BufferPeriod,
        stats: StatsConfig {
            capture_threshold_ms: 8,
            ..Default::default()
        },
        ..Default::default()
    };
    config.save(&path).unwrap();

    let loaded = LoopbackConfig::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.expected_period_ms(), 10);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "test_type": "buffer-period", "stats": { "discard": 20 } }"#).unwrap();

    let loaded = LoopbackConfig::load_from(&path).unwrap();
    assert_eq!(loaded.test_type, TestType::BufferPeriod);
    assert_eq!(loaded.stats.discard, 20);
    assert_eq!(loaded.stats.partner_discard, 2);
    assert_eq!(loaded.sample_rate, loopback::DEFAULT_SAMPLE_RATE);
    assert_eq!(loaded.jitter_fifo_frames, 1024);
}

#[test]
fn test_load_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.json");
    assert!(matches!(
        LoopbackConfig::load_from(&missing),
        Err(ConfigError::Io { .. })
    ));

    let garbage = dir.path().join("garbage.json");
    std::fs::write(&garbage, "not json").unwrap();
    assert!(matches!(
        LoopbackConfig::load_from(&garbage),
        Err(ConfigError::Parse { .. })
    ));

    let invalid = dir.path().join("invalid.json");
    std::fs::write(&invalid, r#"{ "channels": 0 }"#).unwrap();
    assert!(matches!(
        LoopbackConfig::load_from(&invalid),
        Err(ConfigError::Invalid(_))
    ));
}
