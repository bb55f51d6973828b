//! Presence collaborator
//!
//! Answers "does this identity have a live connection somewhere?". The
//! router asks before every direct delivery; shards set and clear the bit
//! on register/unregister.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::error::BackendError;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set_online(&self, identity: &str) -> Result<(), BackendError>;
    async fn set_offline(&self, identity: &str) -> Result<(), BackendError>;
    async fn is_online(&self, identity: &str) -> Result<bool, BackendError>;
}

/// Process-local presence bits
#[derive(Debug, Default)]
pub struct InMemoryPresence {
    online: RwLock<HashSet<String>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn online_count(&self) -> usize {
        self.online.read().await.len()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresence {
    async fn set_online(&self, identity: &str) -> Result<(), BackendError> {
        self.online.write().await.insert(identity.to_string());
        Ok(())
    }

    async fn set_offline(&self, identity: &str) -> Result<(), BackendError> {
        self.online.write().await.remove(identity);
        Ok(())
    }

    async fn is_online(&self, identity: &str) -> Result<bool, BackendError> {
        Ok(self.online.read().await.contains(identity))
    }
}
