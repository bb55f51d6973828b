//! Shared Module
//!
//! Transport-agnostic building blocks used by the backend: the wire
//! envelope and its codec, the fragment assembler, configuration types and
//! the shared error type. Nothing here depends on axum or a database, so the
//! module also builds without the `ssr` feature (for clients and tools that
//! only need to speak the wire format).

/// Wire envelope and bincode/JSON codec
pub mod envelope;

/// Chunking and reassembly of oversized envelopes
pub mod fragment;

/// Shared error types
pub mod error;

/// Server configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use envelope::{ContentKind, DeliveryKind, Envelope};
pub use error::SharedError;
pub use fragment::{FragmentAssembler, FragmentError, FragmentOutcome};
pub use config::{ChatConfig, ChatConfigBuilder, ConfigError};
