//! Chat server configuration
//!
//! `ChatConfig` is deserialized from TOML, every field has a default, and
//! `validate()` runs before anything is built from it. The backend layers
//! environment overrides on top (see `backend::server::config`).
//!
//! ```toml
//! [pool]
//! initial_shards = 2
//! max_shards = 4
//! load_threshold = 5
//!
//! [fragment]
//! max_fragment_size = 65536
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Complete server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub shard: ShardConfig,
    pub connection: ConnectionConfig,
    pub fragment: FragmentConfig,
    pub broker: BrokerConfig,
    pub assistant: AssistantConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Placement and growth policy of the shard pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub initial_shards: usize,
    pub max_shards: usize,
    /// Load at which a shard counts as saturated
    pub load_threshold: usize,
    /// Refuse admission instead of overloading once the pool is at maximum
    pub reject_when_saturated: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_shards: 4,
            max_shards: 8,
            load_threshold: 150,
            reject_when_saturated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub work_queue_capacity: usize,
    pub forward_queue_capacity: usize,
    /// Processing tasks draining each shard's work queue
    pub processors: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            work_queue_capacity: 100,
            forward_queue_capacity: 100,
            processors: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub outbound_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ConnectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Chunking limits for oversized envelopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    /// Largest serialized envelope sent as a single frame, in bytes
    pub max_fragment_size: usize,
    /// Hard cap on fragments per message
    pub max_fragments: u32,
    pub assembly_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: 64 * 1024,
            max_fragments: 1000,
            assembly_timeout_secs: 30,
            sweep_interval_secs: 60,
        }
    }
}

impl FragmentConfig {
    pub fn assembly_timeout(&self) -> Duration {
        Duration::from_secs(self.assembly_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 1024,
        }
    }
}

/// OpenAI-compatible chat-completion endpoint answering the assistant identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub identity: String,
    pub base_url: String,
    pub model: String,
    /// The assistant is disabled without a key
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            identity: "assistant".to_string(),
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

impl AssistantConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL; in-memory collaborators are used when absent
    pub url: Option<String>,
}

impl ChatConfig {
    /// Create a new ChatConfigBuilder
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder::default()
    }

    /// Parse TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pool = &self.pool;
        if pool.initial_shards == 0 {
            return Err(ConfigError::invalid("pool.initial_shards", "must be at least 1"));
        }
        if pool.max_shards < pool.initial_shards {
            return Err(ConfigError::invalid(
                "pool.max_shards",
                format!("{} is below initial_shards {}", pool.max_shards, pool.initial_shards),
            ));
        }
        if pool.load_threshold == 0 {
            return Err(ConfigError::invalid("pool.load_threshold", "must be at least 1"));
        }
        let capacities = [
            ("shard.work_queue_capacity", self.shard.work_queue_capacity),
            ("shard.forward_queue_capacity", self.shard.forward_queue_capacity),
            ("shard.processors", self.shard.processors),
            ("connection.outbound_capacity", self.connection.outbound_capacity),
            ("fragment.max_fragment_size", self.fragment.max_fragment_size),
            ("broker.capacity", self.broker.capacity),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.fragment.max_fragments == 0 {
            return Err(ConfigError::invalid("fragment.max_fragments", "must be greater than zero"));
        }
        if self.connection.heartbeat_interval_secs == 0 {
            return Err(ConfigError::invalid("connection.heartbeat_interval_secs", "must be greater than zero"));
        }
        if self.fragment.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid("fragment.sweep_interval_secs", "must be greater than zero"));
        }
        if self.connection.heartbeat_timeout_secs <= self.connection.heartbeat_interval_secs {
            return Err(ConfigError::invalid(
                "connection.heartbeat_timeout_secs",
                "must exceed heartbeat_interval_secs",
            ));
        }
        if self.assistant.identity.is_empty() {
            return Err(ConfigError::invalid("assistant.identity", "must not be empty"));
        }
        Ok(())
    }
}

/// Builder for ChatConfig
///
/// Starts from the defaults; only the knobs tests and embedders usually
/// touch have setters. `build()` validates.
#[derive(Debug, Default)]
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server.bind_addr = addr.into();
        self
    }

    pub fn shards(mut self, initial: usize, max: usize) -> Self {
        self.config.pool.initial_shards = initial;
        self.config.pool.max_shards = max;
        self
    }

    pub fn load_threshold(mut self, threshold: usize) -> Self {
        self.config.pool.load_threshold = threshold;
        self
    }

    pub fn reject_when_saturated(mut self, reject: bool) -> Self {
        self.config.pool.reject_when_saturated = reject;
        self
    }

    pub fn work_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.shard.work_queue_capacity = capacity;
        self
    }

    pub fn forward_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.shard.forward_queue_capacity = capacity;
        self
    }

    pub fn processors(mut self, processors: usize) -> Self {
        self.config.shard.processors = processors;
        self
    }

    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.connection.outbound_capacity = capacity;
        self
    }

    pub fn heartbeat(mut self, interval_secs: u64, timeout_secs: u64) -> Self {
        self.config.connection.heartbeat_interval_secs = interval_secs;
        self.config.connection.heartbeat_timeout_secs = timeout_secs;
        self
    }

    pub fn max_fragment_size(mut self, size: usize) -> Self {
        self.config.fragment.max_fragment_size = size;
        self
    }

    pub fn max_fragments(mut self, cap: u32) -> Self {
        self.config.fragment.max_fragments = cap;
        self
    }

    pub fn broker_enabled(mut self, enabled: bool) -> Self {
        self.config.broker.enabled = enabled;
        self
    }

    pub fn assistant(mut self, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.config.assistant.base_url = base_url.into();
        self.config.assistant.api_key = Some(api_key.into());
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = Some(url.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ChatConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
