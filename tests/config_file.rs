// Integration tests for loading configuration files from disk

use scalebridge::config::{Config, Handshake};
use scalebridge::error::ConfigError;
use tempfile::tempdir;

#[tokio::test]
async fn test_default_config_written_and_loaded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path = path.to_str().unwrap();

    Config::create_default(path).await.unwrap();
    let config = Config::load(path).await.unwrap();

    assert_eq!(config.trigger.port, 5000);
    assert_eq!(config.serial_ports.len(), 1);
    assert_eq!(config.serial_ports[0].name, "COM3");
    assert_eq!(config.serial_ports[0].decimal_places, 2);
    assert!(config.broadcast.targets.is_empty());
}

#[tokio::test]
async fn test_full_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    std::fs::write(
        &path,
        r#"
[trigger]
bind = "127.0.0.1"
port = 7000

[[serial_ports]]
name = "LINE1"
device = "/dev/ttyS0"
baud_rate = 19200
handshake = "software"
timeout_ms = 5000
decimal_places = 3

[broadcast]
listen_port = 7001

[[broadcast.targets]]
ip = "10.0.0.5"
port = 9100

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = Config::load(path.to_str().unwrap()).await.unwrap();
    let line1 = config.find_profile("line1").unwrap();
    assert_eq!(line1.device_path(), "/dev/ttyS0");
    assert_eq!(line1.handshake, Handshake::Software);
    assert_eq!(config.broadcast.listen_port, Some(7001));
    assert_eq!(config.broadcast.targets[0].addr(), "10.0.0.5:9100");
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.file.is_none());
}

#[tokio::test]
async fn test_missing_file_is_a_read_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = Config::load(path.to_str().unwrap()).await.unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[tokio::test]
async fn test_empty_profile_list_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "serial_ports = []\n\n[trigger]\nport = 5000\n").unwrap();
    let err = Config::load(path.to_str().unwrap()).await.unwrap_err();
    assert!(matches!(err, ConfigError::NoProfiles));
}
