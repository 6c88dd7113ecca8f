// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use dualcast::{AppError, BitratePreset, Config};

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.default_bitrate, 4_000_000);
    assert_eq!((config.preview_width, config.preview_height), (1280, 720));
    assert_eq!(config.source, "test");
    assert!(
        config.preferred_encoder.is_none(),
        "Encoder should be selected automatically by default"
    );
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let config = Config {
        bitrate_preset: Some(BitratePreset::Low),
        output_dir: Some(dir.path().join("videos")),
        source: "v4l2:/dev/video2".to_string(),
        preferred_encoder: Some("x264enc".to_string()),
        ..Config::default()
    };
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.recordings_dir(), dir.path().join("videos"));
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    match Config::load_from(&path) {
        Err(AppError::Config(msg)) => assert!(msg.contains("config.json")),
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[test]
fn test_preset_drives_bitrate() {
    let config = Config {
        bitrate_preset: Some(BitratePreset::Medium),
        ..Config::default()
    };
    assert_eq!(config.resolve_bitrate(1920, None), 8_000_000);
    assert_eq!(config.resolve_bitrate(1920, Some(3_000_000)), 3_000_000);
}
