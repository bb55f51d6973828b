/*!
 * ShardPool
 *
 * Owns the shards and the identity → shard index, admits new connections,
 * and grows the pool when every shard has reached the load threshold.
 *
 * # Admission
 *
 * 1. If every shard's load is at or above `load_threshold` and the pool is
 *    below `max_shards`, a new shard is started (its id is the current size).
 * 2. The least-loaded shard is chosen; ties go to the lowest id.
 * 3. Its load is incremented before the caller registers the connection.
 *
 * Admission holds the shard list's write lock, so two concurrent admissions
 * never both grow the pool for the same saturation.
 *
 * When the pool is at `max_shards` and saturated, admission is best-effort
 * (least-loaded shard, with a warning) unless `reject_when_saturated` is set.
 */

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::backend::error::BackendError;
use crate::backend::gateway::connection::{ClientInfo, Connection};
use crate::backend::services::Services;
use crate::backend::shard::worker::{Shard, ShardStats};
use crate::shared::config::ChatConfig;

/// Monitoring snapshot of the whole pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_shards: usize,
    pub max_shards: usize,
    pub load_threshold: usize,
    pub tracked_identities: usize,
    pub shards: Vec<ShardStats>,
}

pub struct ShardPool {
    shards: RwLock<Vec<Arc<Shard>>>,
    index: RwLock<HashMap<String, Arc<Shard>>>,
    config: Arc<ChatConfig>,
    services: Services,
    shutdown: CancellationToken,
    self_ref: Weak<ShardPool>,
}

impl std::fmt::Debug for ShardPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardPool")
            .field("services", &self.services)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ShardPool {
    /// Start `pool.initial_shards` shards
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: Arc<ChatConfig>, services: Services) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<ShardPool>| {
            let shutdown = CancellationToken::new();
            let shards = (0..config.pool.initial_shards)
                .map(|id| {
                    Shard::spawn(
                        id,
                        &config,
                        services.clone(),
                        self_ref.clone(),
                        shutdown.child_token(),
                    )
                })
                .collect();
            tracing::info!(
                "[Pool] Started {} shards (max {}, load threshold {})",
                config.pool.initial_shards,
                config.pool.max_shards,
                config.pool.load_threshold
            );
            Self {
                shards: RwLock::new(shards),
                index: RwLock::new(HashMap::new()),
                config,
                services,
                shutdown,
                self_ref: self_ref.clone(),
            }
        })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Choose a shard for a new connection and count it against that shard
    pub async fn admit(&self, identity: &str) -> Result<Arc<Shard>, BackendError> {
        let threshold = self.config.pool.load_threshold;
        let max_shards = self.config.pool.max_shards;
        let mut shards = self.shards.write().await;

        let saturated = shards.iter().all(|shard| shard.load() >= threshold);
        if saturated {
            if shards.len() < max_shards {
                let id = shards.len();
                shards.push(Shard::spawn(
                    id,
                    &self.config,
                    self.services.clone(),
                    self.self_ref.clone(),
                    self.shutdown.child_token(),
                ));
                tracing::info!(
                    "[Pool] All shards at load threshold {}, started shard {}",
                    threshold,
                    id
                );
            } else if self.config.pool.reject_when_saturated || shards.is_empty() {
                tracing::warn!("[Pool] Rejecting {}: {} shards saturated", identity, shards.len());
                return Err(BackendError::PoolExhausted {
                    shards: shards.len(),
                    threshold,
                });
            } else {
                tracing::warn!(
                    "[Pool] Pool saturated at {} shards, admitting {} over threshold",
                    shards.len(),
                    identity
                );
            }
        }

        let chosen = shards
            .iter()
            .min_by_key(|shard| shard.load())
            .cloned()
            .ok_or(BackendError::PoolExhausted {
                shards: 0,
                threshold,
            })?;
        chosen.acquire_load();
        tracing::debug!(
            "[Pool] Admitted {} to shard {} (load {})",
            identity,
            chosen.id(),
            chosen.load()
        );
        Ok(chosen)
    }

    /// Point `identity` at `shard`, returning the shard it pointed at before
    pub async fn track(&self, identity: &str, shard: Arc<Shard>) -> Option<Arc<Shard>> {
        self.index.write().await.insert(identity.to_string(), shard)
    }

    /// Remove the index entry and clear presence, but only while the entry
    /// still points at `shard_id`
    ///
    /// The index lock is held across the presence update, so a reconnect's
    /// `track` followed by `set_online` always lands after it.
    pub async fn untrack(&self, identity: &str, shard_id: usize) -> bool {
        let mut index = self.index.write().await;
        let owner = match index.get(identity) {
            Some(shard) if shard.id() == shard_id => Arc::clone(shard),
            _ => return false,
        };
        // A newer connection may already hold the identity on the same shard.
        if owner.connection(identity).await.is_some() {
            return false;
        }
        index.remove(identity);
        if let Err(err) = self.services.presence.set_offline(identity).await {
            tracing::warn!("[Pool] Failed to set {} offline: {}", identity, err);
        }
        true
    }

    pub async fn locate(&self, identity: &str) -> Option<Arc<Shard>> {
        self.index.read().await.get(identity).cloned()
    }

    pub async fn size(&self) -> usize {
        self.shards.read().await.len()
    }

    pub async fn shard(&self, id: usize) -> Option<Arc<Shard>> {
        self.shards.read().await.get(id).cloned()
    }

    pub async fn shards(&self) -> Vec<Arc<Shard>> {
        self.shards.read().await.clone()
    }

    pub async fn all_connections(&self) -> Vec<Arc<Connection>> {
        let mut connections = Vec::new();
        for shard in self.shards().await {
            connections.extend(shard.connections.snapshot().await);
        }
        connections
    }

    pub async fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .all_connections()
            .await
            .iter()
            .map(|connection| connection.info())
            .collect();
        clients.sort_by(|a, b| a.identity.cmp(&b.identity));
        clients
    }

    pub async fn stats(&self) -> PoolStats {
        let shards = self.shards().await;
        let mut shard_stats = Vec::with_capacity(shards.len());
        for shard in &shards {
            shard_stats.push(shard.stats().await);
        }
        PoolStats {
            total_shards: shards.len(),
            max_shards: self.config.pool.max_shards,
            load_threshold: self.config.pool.load_threshold,
            tracked_identities: self.index.read().await.len(),
            shards: shard_stats,
        }
    }

    /// Write a frame to the identity's local connection, wherever it lives
    pub async fn deliver_frame(&self, identity: &str, frame: Vec<u8>) -> Result<bool, BackendError> {
        match self.locate(identity).await {
            Some(shard) => shard.deliver_frame(identity, frame).await,
            None => Ok(false),
        }
    }

    /// Stop every shard's tasks
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("[Pool] Shutting down");
        }
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
