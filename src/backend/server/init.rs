/**
 * Server Initialization
 *
 * # Initialization Process
 *
 * 1. Validate the configuration
 * 2. Pick collaborators: Postgres-backed offline store and group directory
 *    when `database.url` is set and reachable, in-memory otherwise
 * 3. Attach the broker (and start its consumer) when `broker.enabled`
 * 4. Attach the assistant client when an API key is configured
 * 5. Start the shard pool and build the router
 *
 * A database that cannot be reached is logged and the server starts with
 * in-memory collaborators.
 */

use std::sync::Arc;

use axum::Router;

use crate::backend::error::BackendError;
use crate::backend::realtime::{spawn_consumer, BroadcastBroker};
use crate::backend::routes::router::create_router;
use crate::backend::server::config::load_database;
use crate::backend::server::state::AppState;
use crate::backend::services::{
    ChatCompletionClient, InMemoryPresence, PgGroupDirectory, PgOfflineStore, Services,
};
use crate::backend::shard::ShardPool;
use crate::shared::config::ChatConfig;

/// Build the application router and the state behind it
///
/// The returned state is kept by the caller for shutdown
/// (`state.pool.shutdown()`).
pub async fn create_app(config: ChatConfig) -> Result<(Router, AppState), BackendError> {
    tracing::info!("[Server] Initializing chat backend");
    config.validate()?;

    let services = match config.database.url.as_deref() {
        Some(url) => match load_database(url).await {
            Ok(db) => Services::new(
                Arc::new(InMemoryPresence::new()),
                Arc::new(PgOfflineStore::new(db.clone())),
                Arc::new(PgGroupDirectory::new(db)),
            ),
            Err(err) => {
                tracing::error!("[Server] Database unavailable: {}", err);
                tracing::warn!("[Server] Falling back to in-memory collaborators");
                Services::in_memory()
            }
        },
        None => {
            tracing::warn!("[Server] No database configured, using in-memory collaborators");
            Services::in_memory()
        }
    };

    let state = build_state(Arc::new(config), services)?;
    let app = create_router(state.clone());
    tracing::info!("[Server] Router configured");
    Ok((app, state))
}

/// Wire the broker, the assistant and the pool around `services`
///
/// An assistant already present on `services` is kept.
pub fn build_state(config: Arc<ChatConfig>, mut services: Services) -> Result<AppState, BackendError> {
    let broker = config
        .broker
        .enabled
        .then(|| BroadcastBroker::new(config.broker.capacity));
    if let Some(broker) = &broker {
        services = services.with_broker(Arc::new(broker.clone()));
    }

    if services.assistant.is_none() && config.assistant.is_enabled() {
        let client = ChatCompletionClient::new(&config.assistant)?;
        services = services.with_assistant(config.assistant.identity.clone(), Arc::new(client));
        tracing::info!("[Server] Assistant enabled as {}", config.assistant.identity);
    }

    let pool = ShardPool::new(Arc::clone(&config), services.clone());
    if let Some(broker) = &broker {
        spawn_consumer(
            broker,
            Arc::clone(&pool),
            Arc::clone(&services.groups),
            pool.shutdown_token(),
        );
    }

    Ok(AppState {
        config,
        pool,
        services,
        broker,
    })
}
