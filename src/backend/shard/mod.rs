//! Sharded connection ownership and message routing
//!
//! ```text
//! ShardPool ──admit──▶ Shard ──register──▶ ConnectionRegistry
//!     │                  │
//!     │ index            ├─ work queue    ─▶ N processors ─▶ router
//!     ▼                  └─ forward queue ─▶ coordinator  ─▶ work queue
//! identity → Shard
//! ```

/// Bounded, non-blocking queues
pub mod queue;

/// Per-shard connection map
pub mod registry;

/// Shard state, lifecycle and processing tasks
pub mod worker;

/// Routing decisions for queued messages
pub mod router;

/// Shard set, admission and identity index
pub mod pool;

pub use pool::{PoolStats, ShardPool};
pub use queue::{BoundedQueue, OfferError};
pub use registry::ConnectionRegistry;
pub use router::Delivery;
pub use worker::{ForwardedFrame, MessageTask, Shard, ShardStats, TaskOrigin};
