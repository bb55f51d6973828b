//! WebSocket upgrade handler (`GET /ws?uuid=<identity>`)
//!
//! Identity comes from the `uuid` query parameter; authentication is
//! expected to happen in front of this service. The connection is admitted
//! to a shard before the upgrade, so a saturated pool configured to reject
//! answers 503 instead of upgrading. A failed upgrade returns the admitted
//! load.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{Extensions, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::backend::error::BackendError;
use crate::backend::gateway::connection::Connection;
use crate::backend::gateway::session::{spawn_session, Keepalive};
use crate::backend::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub uuid: Option<String>,
}

pub async fn handle_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    extensions: Extensions,
    ws: WebSocketUpgrade,
) -> Result<Response, BackendError> {
    let identity = params
        .uuid
        .map(|uuid| uuid.trim().to_string())
        .filter(|uuid| !uuid.is_empty())
        .ok_or_else(|| BackendError::handler(StatusCode::UNAUTHORIZED, "missing uuid"))?;
    let remote_addr = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let shard = state.pool.admit(&identity).await?;
    let settings = state.config.connection.clone();

    let failed_shard = shard.clone();
    let failed_identity = identity.clone();
    Ok(ws
        .max_message_size(settings.max_frame_bytes)
        .on_failed_upgrade(move |err| {
            tracing::warn!("[Connection] Upgrade for {} failed: {}", failed_identity, err);
            failed_shard.release_load();
        })
        .on_upgrade(move |socket| async move {
            let (connection, outbound) = Connection::new(identity, remote_addr, settings.outbound_capacity);
            shard.register(connection.clone()).await;
            spawn_session(shard, connection, outbound, socket, Keepalive::from(&settings));
        }))
}
