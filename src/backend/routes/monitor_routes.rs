/**
 * Monitoring Routes
 *
 * - `GET /monitor/shards` - pool size, threshold and per-shard counters
 * - `GET /monitor/clients` - every live connection with its shard
 * - `GET /health` - `ok`
 */

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::backend::gateway::ClientInfo;
use crate::backend::server::state::AppState;
use crate::backend::shard::{PoolStats, ShardPool};

pub fn configure_monitor_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/monitor/shards", get(get_shard_stats))
        .route("/monitor/clients", get(get_clients))
        .route("/health", get(health))
}

pub async fn get_shard_stats(State(pool): State<Arc<ShardPool>>) -> Json<PoolStats> {
    Json(pool.stats().await)
}

pub async fn get_clients(State(pool): State<Arc<ShardPool>>) -> Json<Vec<ClientInfo>> {
    Json(pool.clients().await)
}

pub async fn health() -> &'static str {
    "ok"
}
