use procwatch::config::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.general.sample_interval_seconds, 2.0);
    assert!(config.general.notifications_enabled);
    assert_eq!(config.detection.cpu.threshold_percent, 100.0);
    assert_eq!(config.detection.memory.threshold_bytes, 1_000_000_000);
}

#[test]
fn test_load_from_toml() {
    let toml_content = r#"
[general]
sample_interval_seconds = 5.0
notifications_enabled = false
notification_timeout_seconds = 10
core_count = 8

[detection.cpu]
threshold_percent = 80.0
duration_seconds = 30.0

[detection.memory]
threshold_bytes = 500000000
duration_seconds = 10.0
tolerance_bytes = 4096
"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(toml_content.as_bytes()).unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.general.sample_interval_seconds, 5.0);
    assert!(!config.general.notifications_enabled);
    assert_eq!(config.general.core_count, 8);
    assert_eq!(config.detection.cpu.threshold_percent, 80.0);
    assert_eq!(config.detection.memory.tolerance_bytes, 4096);
}

#[test]
fn test_save_config() {
    let config = Config::default();
    let file = NamedTempFile::new().unwrap();
    config.save(file.path()).unwrap();
    let loaded = Config::load(file.path()).unwrap();
    assert_eq!(
        loaded.general.sample_interval_seconds,
        config.general.sample_interval_seconds
    );
    assert_eq!(
        loaded.detection.memory.threshold_bytes,
        config.detection.memory.threshold_bytes
    );
}

#[test]
fn test_explicit_core_count_wins_over_autodetect() {
    let mut config = Config::default();
    config.general.core_count = 3;
    assert_eq!(config.effective_core_count(), 3);
    config.general.core_count = 0;
    assert!(config.effective_core_count() >= 1);
}
