//! Shared Error Types
//!
//! Errors raised by the transport-agnostic layer: envelope encoding and
//! decoding, and value validation. The backend wraps these in
//! `BackendError` so handlers and routing code see one error type.
//!
//! # Error Categories
//!
//! - `Codec` - bincode or JSON encoding/decoding failures
//! - `Validation` - a field holds a value the system cannot work with
//! - `Envelope` - a structurally valid envelope that cannot be processed
//!
//! # Usage
//!
//! ```rust
//! use chatshard::shared::error::SharedError;
//!
//! let error = SharedError::validation("to", "target identity is empty");
//! assert!(error.to_string().contains("to"));
//! ```
use thiserror::Error;

/// Errors shared by the envelope codec and configuration helpers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharedError {
    /// Wire encoding or decoding failed
    #[error("Codec error ({format}): {message}")]
    Codec {
        /// Which encoding was in use (`bincode` or `json`)
        format: &'static str,
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// Envelope could be decoded but not processed
    #[error("Envelope error: {message}")]
    Envelope {
        /// Human-readable error message
        message: String,
    },
}

impl SharedError {
    /// Create a new codec error
    pub fn codec(format: &'static str, message: impl Into<String>) -> Self {
        Self::Codec {
            format,
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new envelope error
    pub fn envelope(message: impl Into<String>) -> Self {
        Self::Envelope {
            message: message.into(),
        }
    }

    /// True when the failure came from decoding bytes off the wire
    pub fn is_codec(&self) -> bool {
        matches!(self, Self::Codec { .. })
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec("json", err.to_string())
    }
}

impl From<bincode::Error> for SharedError {
    fn from(err: bincode::Error) -> Self {
        Self::codec("bincode", err.to_string())
    }
}
