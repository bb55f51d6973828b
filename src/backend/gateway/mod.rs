//! Client-facing socket gateway
//!
//! - **`handler`** - `GET /ws` upgrade and admission
//! - **`connection`** - `Connection`, the shared per-socket state
//! - **`session`** - read loop, write loop and their supervisor

/// WebSocket upgrade handler
pub mod handler;

/// Per-socket state
pub mod connection;

/// Socket read/write tasks
pub mod session;

pub use connection::{ClientInfo, Connection, UNASSIGNED_SHARD};
pub use handler::{handle_upgrade, ConnectParams};
pub use session::{spawn_session, Keepalive};
