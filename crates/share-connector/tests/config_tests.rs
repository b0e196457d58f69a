use std::io::Write;

use share_connector::config::{AuthMode, HubConfig};
use share_connector::{hash_key, ConfigError};

#[test]
fn loads_full_file_from_explicit_path() {
    let digest = hash_key("alice-key");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[rpc]
bind_addr = "0.0.0.0:7000"
max_connections = 32

[websocket]
enabled = false

[liveness]
heartbeat_timeout_secs = 90
sweep_interval_secs = 10

[delivery]
outbound_queue_capacity = 64
notify_conflicts = false

[reputation]
half_life_days = 3.5
leaderboard_min_tasks = 2

[auth]
mode = "static"

[[auth.credentials]]
agent_id = "alice"
key_sha256 = "{digest}"

[rate_limit]
capacity = 10
refill_per_sec = 5.0

[logging]
level = "debug"
"#
    )
    .unwrap();

    let (config, path) = HubConfig::load(Some(file.path())).unwrap();
    assert_eq!(path.as_deref(), Some(file.path()));
    assert_eq!(config.rpc.bind_addr, "0.0.0.0:7000");
    assert!(!config.websocket.enabled);
    assert_eq!(config.auth.mode, AuthMode::Static);
    assert_eq!(config.auth.credentials[0].key_sha256, digest);
    assert_eq!(config.logging.level, "debug");

    let settings = config.hub_settings();
    assert_eq!(settings.liveness.heartbeat_timeout_secs, 90);
    assert_eq!(settings.delivery.outbound_queue_capacity, 64);
    assert!(!settings.delivery.notify_conflicts);
    assert_eq!(settings.reputation.half_life_days, 3.5);
    assert_eq!(settings.reputation.history_window_days, 30);
}

#[test]
fn invalid_values_fail_at_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[liveness]\nheartbeat_timeout_secs = 0").unwrap();
    assert!(matches!(
        HubConfig::load(Some(file.path())),
        Err(ConfigError::InvalidValue { .. })
    ));
}

#[test]
fn reputation_bounds_fail_at_load() {
    for body in [
        "[reputation]\nhistory_window_days = 200000000000000",
        "[reputation]\nhalf_life_days = 0.001",
    ] {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{body}").unwrap();
        assert!(matches!(
            HubConfig::load(Some(file.path())),
            Err(ConfigError::InvalidValue { field: "hub", .. })
        ));
    }

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[reputation]\nhistory_window_days = 36500").unwrap();
    assert!(HubConfig::load(Some(file.path())).is_ok());
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[rpc\nbind_addr = ").unwrap();
    assert!(matches!(
        HubConfig::load(Some(file.path())),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn missing_explicit_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        HubConfig::load(Some(&missing)),
        Err(ConfigError::Io { .. })
    ));
}
