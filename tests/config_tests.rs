// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use camera_engine::engine::controls::{Facing, Mode, PictureFormat};
use camera_engine::{BackendKind, EngineConfig, EngineError};
use std::time::Duration;

#[test]
fn test_config_default() {
    let config = EngineConfig::default();

    // Check sensible defaults
    assert_eq!(config.facing, Facing::Back);
    assert_eq!(config.mode, Mode::Picture);
    assert_eq!(config.picture_format, PictureFormat::Jpeg);
    assert!(config.picture_metering, "Full pictures should meter by default");
    assert!(
        !config.picture_snapshot_metering,
        "Snapshots should not meter by default"
    );
    assert_eq!(config.auto_focus_reset_delay(), Duration::from_secs(3));
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let config = EngineConfig {
        backend: BackendKind::Legacy,
        facing: Facing::Front,
        mode: Mode::Video,
        snapshot_max_width: 1280,
        snapshot_max_height: 720,
        ..EngineConfig::default()
    };
    config.save(&path).unwrap();

    let loaded = EngineConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_config_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = EngineConfig::load(&dir.path().join("absent.json")).unwrap();
    assert_eq!(loaded, EngineConfig::default());
}

#[test]
fn test_config_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "play_sounds": false }"#).unwrap();

    let loaded = EngineConfig::load(&path).unwrap();
    assert!(!loaded.play_sounds);
    assert_eq!(loaded.release_timeout(), Duration::from_secs(6));
}

#[test]
fn test_config_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "frame_processing_pool_size": 0 }"#).unwrap();

    let result = EngineConfig::load(&path);
    assert!(
        matches!(result, Err(EngineError::Config(_))),
        "Pool size 0 should be rejected, got {:?}",
        result
    );
}

#[test]
fn test_config_rejects_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(EngineConfig::load(&path).is_err());
}
