//! Server Module
//!
//! - **`state`** - `AppState` and its `FromRef` implementations
//! - **`config`** - configuration loading and database connection
//! - **`init`** - collaborator wiring and app creation
//!
//! ```text
//! server/
//! ├── mod.rs
//! ├── state.rs   - AppState
//! ├── config.rs  - load_config, load_database
//! └── init.rs    - create_app, build_state
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use chatshard::backend::server::{create_app, load_config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (app, state) = create_app(load_config()?).await?;
//! let listener = tokio::net::TcpListener::bind(&state.config.server.bind_addr).await?;
//! axum::serve(listener, app).await?;
//! state.pool.shutdown();
//! # Ok(())
//! # }
//! ```

/// Application state
pub mod state;

/// Configuration loading
pub mod config;

/// App creation
pub mod init;

pub use config::{apply_overrides, load_config, load_database};
pub use init::{build_state, create_app};
pub use state::AppState;
