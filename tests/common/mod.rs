//! Common test utilities
//!
//! - Assertion macros
//! - Pool fixtures with in-memory collaborators
//! - Frame receivers with timeouts

pub mod assertions;
#[cfg(feature = "ssr")]
pub mod fixtures;

#[cfg(feature = "ssr")]
pub use fixtures::*;
