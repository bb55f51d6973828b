//! Backend Error Module
//!
//! - **`types`** - `BackendError` and its constructors
//! - **`conversion`** - `IntoResponse` for handlers
//!
//! Handlers return `Result<_, BackendError>`; the conversion renders
//! `{"error": "...", "status": 503}` with the mapped status code.

/// Error type definitions
pub mod types;

/// Error conversion implementations
pub mod conversion;

// Re-export commonly used types
pub use types::BackendError;
