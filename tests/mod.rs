//! Test suite for chatshard
//!
//! - `common` - fixtures and assertion macros
//! - `integration` - routing scenarios, connection lifecycle, sockets, HTTP
//! - `property` - proptest properties for fragmentation and admission

pub mod common;
#[cfg(feature = "ssr")]
pub mod integration;
pub mod property;
