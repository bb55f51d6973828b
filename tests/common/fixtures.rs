//! Pool fixtures
//!
//! `TestPool` owns a `ShardPool` wired to in-memory collaborators and keeps
//! handles to each so tests can seed presence and groups and inspect the
//! offline store. The pool is shut down on drop.

use std::sync::Arc;
use std::time::Duration;

use chatshard::backend::gateway::Connection;
use chatshard::backend::server::{build_state, AppState};
use chatshard::backend::services::{
    Assistant, InMemoryGroupDirectory, InMemoryOfflineStore, InMemoryPresence, Services,
};
use chatshard::backend::shard::{Shard, ShardPool};
use chatshard::shared::envelope::{self, Envelope};
use chatshard::shared::{ChatConfig, ChatConfigBuilder};
use tokio::sync::mpsc;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Small, fast defaults for tests
pub fn test_config() -> ChatConfigBuilder {
    ChatConfig::builder()
        .shards(2, 4)
        .load_threshold(100)
        .processors(2)
        .heartbeat(1, 3)
}

pub struct TestPool {
    pub state: AppState,
    pub pool: Arc<ShardPool>,
    pub presence: Arc<InMemoryPresence>,
    pub offline: Arc<InMemoryOfflineStore>,
    pub groups: Arc<InMemoryGroupDirectory>,
}

/// A registered client: its shard, connection and outbound receiver
pub struct TestClient {
    pub shard: Arc<Shard>,
    pub connection: Arc<Connection>,
    pub outbound: mpsc::Receiver<Vec<u8>>,
}

impl TestPool {
    pub fn new(config: ChatConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_assistant(config: ChatConfig, assistant: Arc<dyn Assistant>) -> Self {
        Self::build(config, Some(assistant))
    }

    fn build(config: ChatConfig, assistant: Option<Arc<dyn Assistant>>) -> Self {
        let presence = Arc::new(InMemoryPresence::new());
        let offline = Arc::new(InMemoryOfflineStore::new());
        let groups = Arc::new(InMemoryGroupDirectory::new());
        let mut services = Services::new(presence.clone(), offline.clone(), groups.clone());
        if let Some(assistant) = assistant {
            services = services.with_assistant(config.assistant.identity.clone(), assistant);
        }
        let state = build_state(Arc::new(config), services).expect("state");
        Self {
            pool: state.pool.clone(),
            state,
            presence,
            offline,
            groups,
        }
    }

    /// Admit and register `identity` the way the upgrade handler does
    pub async fn connect(&self, identity: &str) -> TestClient {
        let shard = self.pool.admit(identity).await.expect("admit");
        let (connection, outbound) = Connection::new(
            identity,
            None,
            self.pool.config().connection.outbound_capacity,
        );
        shard.register(connection.clone()).await;
        TestClient {
            shard,
            connection,
            outbound,
        }
    }
}

impl Drop for TestPool {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

impl TestClient {
    /// Encode and enqueue on the client's own shard, as the read loop does
    pub fn send(&self, message: &Envelope) {
        let raw = envelope::encode(message).expect("encode");
        self.shard
            .enqueue_envelope(message.clone(), raw)
            .expect("enqueue");
    }

    pub async fn recv_raw(&mut self) -> Vec<u8> {
        tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound queue closed")
    }

    pub async fn recv(&mut self) -> Envelope {
        let raw = self.recv_raw().await;
        envelope::decode(&raw).expect("decode")
    }

    /// Assert nothing arrives within `wait`
    pub async fn assert_silent(&mut self, wait: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(wait, self.outbound.recv()).await {
            panic!(
                "{} received an unexpected frame: {:?}",
                self.connection.identity(),
                envelope::decode(&frame)
            );
        }
    }
}

/// Poll `check` until it holds or the timeout passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
