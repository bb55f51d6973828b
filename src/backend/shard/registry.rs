//! Per-shard connection registry
//!
//! A single `tokio::sync::RwLock<HashMap<identity, Arc<Connection>>>` per
//! shard. Routing only takes the read lock (lookups, snapshots); the write
//! lock is held for admission and removal, which never await while holding
//! it. Contention is therefore limited to one shard's connections, and a
//! burst of registrations on one shard does not slow lookups on another.
//!
//! Removal compares sessions, so a stale connection can never remove the
//! newer connection that replaced it under the same identity.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::gateway::connection::Connection;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, returning whatever previously held the identity
    pub async fn insert(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connections
            .write()
            .await
            .insert(connection.identity().to_string(), connection)
    }

    pub async fn get(&self, identity: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(identity).cloned()
    }

    pub async fn contains(&self, identity: &str) -> bool {
        self.connections.read().await.contains_key(identity)
    }

    /// Remove `connection` only if it is still the registered session
    pub async fn remove_if_current(&self, connection: &Connection) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(connection.identity()) {
            Some(current) if current.session() == connection.session() => {
                connections.remove(connection.identity());
                true
            }
            _ => false,
        }
    }

    /// Remove whatever holds `identity` unless it is session `keep`
    pub async fn remove_unless(&self, identity: &str, keep: Uuid) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        match connections.get(identity) {
            Some(current) if current.session() != keep => connections.remove(identity),
            _ => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }
}
