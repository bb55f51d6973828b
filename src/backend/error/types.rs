/*!
 * Backend Error Types
 *
 * One error enum for everything the server does: routing, connection I/O,
 * collaborator calls and HTTP handlers. Each variant maps to an HTTP status
 * so handlers can return it directly.
 *
 * # Error Categories
 *
 * - `Transport` - socket read/write failure or unexpected close; terminal
 *   for that connection
 * - `Protocol` - malformed envelope; the message is dropped
 * - `Backpressure` - a bounded queue was full; the message is dropped
 * - `Fragment` - fragment integrity or cap failures
 * - `Collaborator` - presence, offline store, group directory, broker or
 *   assistant failed
 * - `PoolExhausted` - admission refused because every shard is saturated
 *
 * Nothing in the routing path retries; these errors are logged where they
 * are caught and the offending message is abandoned.
 */

use thiserror::Error;
use axum::http::StatusCode;
use crate::shared::{ConfigError, FragmentError, SharedError};

/// Backend-specific error types
///
/// # Usage
///
/// ```rust
/// use chatshard::backend::error::BackendError;
/// use axum::http::StatusCode;
///
/// let err = BackendError::backpressure("work");
/// assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
///
/// let err = BackendError::handler(StatusCode::UNAUTHORIZED, "missing client identity");
/// assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
/// ```
#[derive(Debug, Error)]
pub enum BackendError {
    /// Handler error (e.g., missing query parameter)
    #[error("Handler error: {message}")]
    HandlerError {
        /// HTTP status code for this error
        status: StatusCode,
        /// Human-readable error message
        message: String,
    },

    /// State management error
    #[error("State error: {message}")]
    StateError {
        /// Human-readable error message
        message: String,
    },

    /// Malformed or unprocessable envelope
    #[error("Protocol error: {message}")]
    ProtocolError {
        /// Human-readable error message
        message: String,
    },

    /// Socket failure or a connection that is already closed
    #[error("Transport error: {message}")]
    TransportError {
        /// Human-readable error message
        message: String,
    },

    /// A bounded queue refused an offer
    #[error("{queue} queue full, message dropped")]
    Backpressure {
        /// Which queue (`work`, `forward`, `outbound`)
        queue: &'static str,
    },

    /// An external collaborator failed
    #[error("{collaborator} failed: {message}")]
    CollaboratorError {
        /// Which collaborator (`presence`, `offline store`, ...)
        collaborator: &'static str,
        /// Human-readable error message
        message: String,
    },

    /// Admission refused: pool at maximum size and every shard saturated
    #[error("shard pool exhausted ({shards} shards at load threshold {threshold})")]
    PoolExhausted {
        shards: usize,
        threshold: usize,
    },

    /// Shared error (codec, validation)
    #[error(transparent)]
    SharedError(#[from] SharedError),

    /// Fragmentation or reassembly failure
    #[error(transparent)]
    FragmentError(#[from] FragmentError),

    /// Invalid configuration
    #[error(transparent)]
    ConfigError(#[from] ConfigError),

    /// Database failure
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Outbound HTTP failure (assistant endpoint)
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl BackendError {
    /// Create a new handler error with a status code
    pub fn handler(status: StatusCode, message: impl Into<String>) -> Self {
        Self::HandlerError {
            status,
            message: message.into(),
        }
    }

    /// Create a new state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::StateError {
            message: message.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportError {
            message: message.into(),
        }
    }

    /// A full bounded queue
    pub fn backpressure(queue: &'static str) -> Self {
        Self::Backpressure { queue }
    }

    /// Create a new collaborator error
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::CollaboratorError {
            collaborator,
            message: message.into(),
        }
    }

    /// True for drops caused by a full queue
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }

    /// Get the HTTP status code for this error
    ///
    /// # Status Code Mapping
    ///
    /// - `HandlerError` - Uses the status code from the error
    /// - `ProtocolError`, `FragmentError`, validation errors - 400 Bad Request
    /// - `Backpressure`, `PoolExhausted` - 503 Service Unavailable
    /// - `CollaboratorError`, `HttpError` - 502 Bad Gateway
    /// - everything else - 500 Internal Server Error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::HandlerError { status, .. } => *status,
            Self::ProtocolError { .. } | Self::FragmentError(_) => StatusCode::BAD_REQUEST,
            Self::SharedError(err) => match err {
                SharedError::Codec { .. } | SharedError::Validation { .. } | SharedError::Envelope { .. } => {
                    StatusCode::BAD_REQUEST
                }
            },
            Self::Backpressure { .. } | Self::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::CollaboratorError { .. } | Self::HttpError(_) => StatusCode::BAD_GATEWAY,
            Self::TransportError { .. }
            | Self::StateError { .. }
            | Self::ConfigError(_)
            | Self::DatabaseError(_)
            | Self::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::HandlerError { message, .. }
            | Self::StateError { message }
            | Self::ProtocolError { message }
            | Self::TransportError { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
