//! Real-time Module
//!
//! The in-process broker and everything that listens to it.
//!
//! - **`broadcast`** - `BroadcastBroker`, the `Broker` collaborator over a
//!   `tokio::sync::broadcast` channel
//! - **`consumer`** - delivers published direct and group frames to local
//!   connections
//! - **`subscription`** - `GET /events` presence stream (SSE)
//!
//! ```text
//! realtime/
//! ├── mod.rs
//! ├── broadcast.rs    - BroadcastBroker
//! ├── consumer.rs     - frame delivery task
//! └── subscription.rs - SSE presence handler
//! ```

/// Broadcast-channel broker
pub mod broadcast;

/// Broker delivery task
pub mod consumer;

/// Server-Sent Events presence handler
pub mod subscription;

pub use broadcast::{broadcast_event, BroadcastBroker};
pub use consumer::spawn_consumer;
pub use subscription::handle_presence_stream;
