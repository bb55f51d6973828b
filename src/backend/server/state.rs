/**
 * Application State
 *
 * `AppState` is the context object handed to every axum handler. It owns
 * nothing global: the pool, the collaborators and the optional broker are
 * built once in `init` and cloned (cheaply, all `Arc`s) into each request.
 *
 * # State Extraction
 *
 * `FromRef` implementations let handlers take only what they need, e.g.
 * `State(pool): State<Arc<ShardPool>>`.
 */

use std::sync::Arc;

use axum::extract::FromRef;

use crate::backend::realtime::BroadcastBroker;
use crate::backend::services::Services;
use crate::backend::shard::ShardPool;
use crate::shared::config::ChatConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ChatConfig>,
    pub pool: Arc<ShardPool>,
    pub services: Services,
    /// `None` unless `broker.enabled`
    pub broker: Option<BroadcastBroker>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("pool", &self.pool)
            .field("broker", &self.broker.is_some())
            .finish_non_exhaustive()
    }
}

impl FromRef<AppState> for Arc<ShardPool> {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Services {
    fn from_ref(state: &AppState) -> Self {
        state.services.clone()
    }
}

impl FromRef<AppState> for Option<BroadcastBroker> {
    fn from_ref(state: &AppState) -> Self {
        state.broker.clone()
    }
}

impl FromRef<AppState> for Arc<ChatConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
