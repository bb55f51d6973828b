// Increase recursion limit for complex async operations
#![recursion_limit = "256"]

//! chatshard - Sharded Real-time Chat Backend
//!
//! chatshard accepts WebSocket connections from chat clients, spreads them
//! over a growing pool of shards, and routes direct and group messages
//! between them: locally, across shards, through an optional broker, or to
//! an offline store when the target is not connected. Oversized messages
//! are fragmented on the way out and can be reassembled with a checksum.
//!
//! # Module Structure
//!
//! - **`shared`** - Wire envelope, codec, fragment assembler, configuration
//!   and shared errors. No server dependencies.
//!
//! - **`backend`** - Server-side code (only compiled with `ssr` feature)
//!   - `gateway`: WebSocket upgrade, per-connection read/write loops, heartbeat
//!   - `shard`: bounded queues, connection registry, shards, routing, the pool
//!   - `services`: presence, offline store, group directory, broker, assistant
//!   - `realtime`: in-process broker, broker consumer, presence event stream
//!   - `server` / `routes`: application state, configuration loading, HTTP router
//!
//! # Feature Flags
//!
//! - **`ssr`** (default) - enables the backend (axum, sqlx, reqwest)
//!
//! # Usage
//!
//! ```rust,no_run
//! use chatshard::backend::server::init::create_app;
//! use chatshard::shared::ChatConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (app, state) = create_app(ChatConfig::default()).await?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app).await?;
//! state.pool.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Each shard guards its own connection map; the identity → shard index is
//! the only pool-wide map and has its own lock. All queues between tasks are
//! bounded and offered to without blocking: a full queue drops the message
//! and logs it.
//!
//! # Error Handling
//!
//! - `shared::SharedError` and `shared::FragmentError` for codec and
//!   fragment failures
//! - `backend::BackendError` for everything the server does, convertible into
//!   an HTTP response

/// Shared types and data structures
pub mod shared;

/// Backend server-side code
#[cfg(feature = "ssr")]
pub mod backend;
