//! Configuration loading from file and environment
//!
//! These tests mutate process environment variables and run serially.

use std::io::Write;

use chatshard::backend::server::config::CONFIG_PATH_VAR;
use chatshard::backend::server::load_config;
use chatshard::shared::ConfigError;
use pretty_assertions::assert_eq;
use serial_test::serial;
use tempfile::NamedTempFile;

const OVERRIDE_VARS: &[&str] = &[
    CONFIG_PATH_VAR,
    "SERVER_ADDR",
    "SERVER_PORT",
    "DATABASE_URL",
    "ASSISTANT_API_KEY",
    "ASSISTANT_BASE_URL",
    "BROKER_ENABLED",
];

/// Clears every variable `load_config` reads, before and after the test
struct EnvGuard;

impl EnvGuard {
    fn new() -> Self {
        clear_vars();
        Self
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        clear_vars();
    }
}

fn clear_vars() {
    for var in OVERRIDE_VARS {
        std::env::remove_var(var);
    }
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_file_values_are_loaded() {
    let _env = EnvGuard::new();
    let file = config_file(
        r#"
        [pool]
        initial_shards = 3
        max_shards = 6
        load_threshold = 40

        [connection]
        heartbeat_interval_secs = 10
        heartbeat_timeout_secs = 25
        "#,
    );
    std::env::set_var(CONFIG_PATH_VAR, file.path());

    let config = crate::assert_ok!(load_config(), "config file should load");
    assert_eq!(config.pool.initial_shards, 3);
    assert_eq!(config.pool.max_shards, 6);
    assert_eq!(config.pool.load_threshold, 40);
    assert_eq!(config.connection.heartbeat_interval_secs, 10);
    // Untouched sections keep their defaults.
    assert_eq!(config.fragment.max_fragment_size, 64 * 1024);
    assert_eq!(config.shard.processors, 3);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let _env = EnvGuard::new();
    let file = config_file(
        r#"
        [server]
        bind_addr = "127.0.0.1:4000"

        [broker]
        enabled = false
        "#,
    );
    std::env::set_var(CONFIG_PATH_VAR, file.path());
    std::env::set_var("SERVER_PORT", "4100");
    std::env::set_var("BROKER_ENABLED", "yes");
    std::env::set_var("DATABASE_URL", "postgres://db/chat");
    std::env::set_var("ASSISTANT_API_KEY", "sk-test");

    let config = load_config().unwrap();
    assert_eq!(config.server.bind_addr, "127.0.0.1:4100");
    assert!(config.broker.enabled);
    assert_eq!(config.database.url.as_deref(), Some("postgres://db/chat"));
    assert!(config.assistant.is_enabled());
}

#[test]
#[serial]
fn test_invalid_file_values_are_rejected() {
    let _env = EnvGuard::new();
    let file = config_file(
        r#"
        [pool]
        initial_shards = 4
        max_shards = 2
        "#,
    );
    std::env::set_var(CONFIG_PATH_VAR, file.path());

    match load_config() {
        Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "pool.max_shards"),
        other => panic!("expected an invalid max_shards, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_malformed_toml_is_a_parse_error() {
    let _env = EnvGuard::new();
    let file = config_file("[pool\ninitial_shards = ");
    std::env::set_var(CONFIG_PATH_VAR, file.path());

    crate::assert_err!(load_config(), ConfigError::Parse(_));
}

#[test]
#[serial]
fn test_missing_file_is_an_io_error() {
    let _env = EnvGuard::new();
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var(CONFIG_PATH_VAR, dir.path().join("absent.toml"));

    crate::assert_err!(load_config(), ConfigError::Io { .. });
}

#[test]
#[serial]
fn test_bad_broker_flag_is_rejected() {
    let _env = EnvGuard::new();
    let file = config_file("");
    std::env::set_var(CONFIG_PATH_VAR, file.path());
    std::env::set_var("BROKER_ENABLED", "sometimes");

    match load_config() {
        Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "BROKER_ENABLED"),
        other => panic!("expected an invalid broker flag, got {other:?}"),
    }
}
