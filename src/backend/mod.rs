//! Backend Module
//!
//! Server-side code, compiled only with the `ssr` feature.
//!
//! # Architecture
//!
//! - **`gateway`** - WebSocket upgrade, `Connection`, read/write loops
//! - **`shard`** - `ShardPool`, `Shard`, routing, bounded queues
//! - **`services`** - collaborator traits and their implementations
//! - **`realtime`** - in-process broker, its consumer, presence SSE
//! - **`server`** - `AppState`, configuration loading, app creation
//! - **`routes`** - HTTP router and monitor/offline handlers
//! - **`error`** - `BackendError` and its HTTP conversion
//!
//! ```text
//! backend/
//! ├── mod.rs
//! ├── main.rs      - chatshard-server binary
//! ├── gateway/     - sockets and connections
//! ├── shard/       - pool, shards, router
//! ├── services/    - presence, offline, groups, broker, assistant
//! ├── realtime/    - broker implementation and listeners
//! ├── server/      - state, config, init
//! ├── routes/      - HTTP routes
//! └── error/       - error types
//! ```
//!
//! # Message Path
//!
//! ```text
//! socket ─▶ read loop ─▶ Shard work queue ─▶ processor ─▶ router
//!                                                          │
//!        ┌─────────────────┬──────────────────┬────────────┴──────┐
//!        ▼                 ▼                  ▼                   ▼
//!   local outbound   other shard's       broker publish      offline store
//!   queue            forward queue       (consumer writes)
//!        │
//!        ▼
//!   write loop ─▶ socket
//! ```

/// Client sockets
pub mod gateway;

/// Sharding and routing
pub mod shard;

/// External collaborators
pub mod services;

/// Broker and presence stream
pub mod realtime;

/// Server setup
pub mod server;

/// HTTP routes
pub mod routes;

/// Backend error types
pub mod error;

pub use error::BackendError;
pub use server::{create_app, AppState};
pub use shard::{Shard, ShardPool};
