/**
 * Server Configuration
 *
 * Loads `ChatConfig` for the binary and connects the optional database.
 *
 * # Configuration Sources
 *
 * In order, later sources winning:
 * 1. Built-in defaults
 * 2. TOML file at `CHATSHARD_CONFIG`, or `./chatshard.toml` if present
 * 3. Environment: `SERVER_ADDR`, `SERVER_PORT`, `DATABASE_URL`,
 *    `ASSISTANT_API_KEY`, `ASSISTANT_BASE_URL`, `BROKER_ENABLED`
 *
 * `.env` is read by the binary (dotenv) before this runs.
 */

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use sqlx::PgPool;

use crate::backend::error::BackendError;
use crate::shared::config::{ChatConfig, ConfigError};

pub const CONFIG_PATH_VAR: &str = "CHATSHARD_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "chatshard.toml";

/// Load the file (if any), apply environment overrides, validate
pub fn load_config() -> Result<ChatConfig, ConfigError> {
    let mut config = match config_path() {
        Some(path) => {
            tracing::info!("[Server] Loading configuration from {}", path.display());
            ChatConfig::from_file(&path)?
        }
        None => ChatConfig::default(),
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
        return Some(PathBuf::from(path));
    }
    let fallback = Path::new(DEFAULT_CONFIG_FILE);
    fallback.exists().then(|| fallback.to_path_buf())
}

/// Apply the environment overrides read through `lookup`
pub fn apply_overrides<F>(config: &mut ChatConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let addr = lookup("SERVER_ADDR").filter(|value| !value.is_empty());
    let port = lookup("SERVER_PORT").filter(|value| !value.is_empty());
    match (addr, port) {
        (Some(addr), None) if addr.parse::<SocketAddr>().is_ok() => config.server.bind_addr = addr,
        (None, None) => {}
        (addr, port) => {
            let (current_host, current_port) = config
                .server
                .bind_addr
                .rsplit_once(':')
                .map(|(host, port)| (host.to_string(), port.to_string()))
                .unwrap_or_else(|| (config.server.bind_addr.clone(), "3000".to_string()));
            let port = port.unwrap_or(current_port);
            port.parse::<u16>()
                .map_err(|_| ConfigError::invalid("SERVER_PORT", format!("{port:?} is not a port")))?;
            config.server.bind_addr = format!("{}:{}", addr.unwrap_or(current_host), port);
        }
    }

    if let Some(url) = lookup("DATABASE_URL").filter(|value| !value.is_empty()) {
        config.database.url = Some(url);
    }
    if let Some(key) = lookup("ASSISTANT_API_KEY").filter(|value| !value.is_empty()) {
        config.assistant.api_key = Some(key);
    }
    if let Some(base_url) = lookup("ASSISTANT_BASE_URL").filter(|value| !value.is_empty()) {
        config.assistant.base_url = base_url;
    }
    if let Some(enabled) = lookup("BROKER_ENABLED") {
        config.broker.enabled = parse_flag(&enabled)
            .ok_or_else(|| ConfigError::invalid("BROKER_ENABLED", format!("{enabled:?} is not a boolean")))?;
    }
    Ok(())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Connect to Postgres and run pending migrations
///
/// A failed migration is logged and startup continues, since the schema may
/// already be current.
pub async fn load_database(url: &str) -> Result<PgPool, BackendError> {
    tracing::info!("[Server] Connecting to database...");
    let pool = PgPool::connect(url).await?;

    match sqlx::migrate!().run(&pool).await {
        Ok(()) => tracing::info!("[Server] Database migrations completed"),
        Err(err) => tracing::warn!("[Server] Database migrations failed, continuing: {}", err),
    }
    Ok(pool)
}
