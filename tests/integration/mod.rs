//! Integration tests
//!
//! - `routing` - direct, cross-shard, offline, group, broadcast, assistant,
//!   broker paths
//! - `lifecycle` - admission, growth, reconnect, teardown, backpressure,
//!   fault containment
//! - `socket` - real WebSocket clients against a served router
//! - `http` - monitor and offline-message routes
//! - `config` - file and environment configuration loading

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod socket;
