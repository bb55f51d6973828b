//! Route Configuration Module
//!
//! ```text
//! routes/
//! ├── mod.rs
//! ├── router.rs          - create_router
//! ├── monitor_routes.rs  - /monitor/shards, /monitor/clients, /health
//! └── message_routes.rs  - /messages/unread, /messages/read
//! ```
//!
//! The socket (`/ws`) and presence stream (`/events`) handlers live with
//! their subsystems in `gateway` and `realtime`.

/// Main router creation
pub mod router;

/// Pool and connection monitoring
pub mod monitor_routes;

/// Offline message listing and acknowledgement
pub mod message_routes;

pub use router::create_router;
