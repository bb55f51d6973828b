//! Registration, eviction, scaling and fault isolation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatshard::backend::gateway::Connection;
use chatshard::backend::server::build_state;
use chatshard::backend::services::{
    GroupDirectory, InMemoryGroupDirectory, InMemoryOfflineStore, InMemoryPresence, PresenceStore, Services,
};
use chatshard::backend::BackendError;
use chatshard::shared::envelope::{ContentKind, Envelope};
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

use crate::common::{eventually, test_config, TestClient, TestPool};

#[tokio::test]
async fn test_reconnect_on_other_shard_evicts_stale_connection() {
    let harness = TestPool::new(test_config().shards(2, 2).build().unwrap());
    let first = harness.connect("alice").await;
    let second = harness.connect("alice").await;
    assert_ne!(first.shard.id(), second.shard.id());

    assert!(first.connection.is_outbound_closed());
    assert!(!second.connection.is_outbound_closed());
    assert_eq!(first.shard.load(), 0);
    assert_eq!(first.shard.connection_count().await, 0);
    assert_eq!(second.shard.load(), 1);

    let located = harness.pool.locate("alice").await.expect("alice tracked");
    assert_eq!(located.id(), second.shard.id());

    // The old session's teardown must not touch the new one.
    assert!(!first.shard.unregister(&first.connection).await);
    assert!(harness.presence.is_online("alice").await.unwrap());
    assert_eq!(harness.pool.locate("alice").await.map(|s| s.id()), Some(second.shard.id()));
}

#[tokio::test]
async fn test_reconnect_on_same_shard_replaces_connection() {
    let harness = TestPool::new(test_config().shards(1, 1).build().unwrap());
    let first = harness.connect("alice").await;
    let mut second = harness.connect("alice").await;
    assert_eq!(first.shard.id(), second.shard.id());

    assert!(first.connection.is_outbound_closed());
    assert_eq!(second.shard.load(), 1);
    assert_eq!(second.shard.connection_count().await, 1);

    let bob = harness.connect("bob").await;
    let message = Envelope::direct("bob", "alice", ContentKind::Text, "which one?");
    bob.send(&message);
    assert_eq!(second.recv().await.content, "which one?");
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let harness = TestPool::new(test_config().build().unwrap());
    let alice = harness.connect("alice").await;
    assert!(harness.presence.is_online("alice").await.unwrap());

    assert!(alice.shard.unregister(&alice.connection).await);
    assert!(!alice.shard.unregister(&alice.connection).await);

    assert!(!harness.presence.is_online("alice").await.unwrap());
    assert!(harness.pool.locate("alice").await.is_none());
    assert_eq!(alice.shard.load(), 0);
    assert!(harness.pool.clients().await.is_empty());
}

#[tokio::test]
async fn test_stale_untrack_keeps_newer_connection_on_same_shard() {
    let harness = TestPool::new(test_config().shards(1, 1).build().unwrap());
    let current = harness.connect("alice").await;

    // A late teardown from an older session on the same shard.
    assert!(!harness.pool.untrack("alice", current.shard.id()).await);
    assert!(harness.presence.is_online("alice").await.unwrap());
    assert_eq!(harness.pool.locate("alice").await.map(|s| s.id()), Some(current.shard.id()));
}

/// Presence whose `set_offline` parks until the test opens the gate
#[derive(Default)]
struct GatedPresence {
    inner: InMemoryPresence,
    entered: Notify,
    gate: Notify,
}

#[async_trait]
impl PresenceStore for GatedPresence {
    async fn set_online(&self, identity: &str) -> Result<(), BackendError> {
        self.inner.set_online(identity).await
    }

    async fn set_offline(&self, identity: &str) -> Result<(), BackendError> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.set_offline(identity).await
    }

    async fn is_online(&self, identity: &str) -> Result<bool, BackendError> {
        self.inner.is_online(identity).await
    }
}

#[tokio::test]
async fn test_reconnect_during_teardown_stays_online() {
    let config = test_config().shards(2, 2).build().unwrap();
    let presence = Arc::new(GatedPresence::default());
    let services = Services::new(
        presence.clone(),
        Arc::new(InMemoryOfflineStore::new()),
        Arc::new(InMemoryGroupDirectory::new()),
    );
    let state = build_state(Arc::new(config), services).unwrap();
    let pool = state.pool.clone();

    let mut held = Vec::new();
    for identity in ["alice", "bob", "carol"] {
        let shard = pool.admit(identity).await.unwrap();
        let (connection, outbound) = Connection::new(identity, None, 16);
        shard.register(connection.clone()).await;
        held.push(TestClient {
            shard,
            connection,
            outbound,
        });
    }
    let old = &held[0];
    assert_eq!(old.shard.id(), 0);

    // The new session is admitted before the old one starts tearing down.
    let new_shard = pool.admit("alice").await.unwrap();
    assert_eq!(new_shard.id(), 1);
    let (new_connection, _new_outbound) = Connection::new("alice", None, 16);

    let teardown = {
        let shard = old.shard.clone();
        let connection = old.connection.clone();
        tokio::spawn(async move { shard.unregister(&connection).await })
    };
    presence.entered.notified().await;

    let reconnect = {
        let shard = new_shard.clone();
        let connection = new_connection.clone();
        tokio::spawn(async move { shard.register(connection).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    presence.gate.notify_one();

    assert!(teardown.await.unwrap());
    reconnect.await.unwrap();

    assert!(presence.is_online("alice").await.unwrap());
    assert_eq!(pool.locate("alice").await.map(|s| s.id()), Some(1));
    assert!(!new_connection.is_outbound_closed());
    pool.shutdown();
}

#[tokio::test]
async fn test_pool_grows_when_every_shard_is_saturated() {
    let harness = TestPool::new(test_config().shards(2, 4).load_threshold(5).build().unwrap());

    let mut clients = Vec::new();
    for n in 0..10 {
        clients.push(harness.connect(&format!("user-{n}")).await);
    }
    assert_eq!(harness.pool.size().await, 2);
    let loads: Vec<usize> = harness.pool.shards().await.iter().map(|s| s.load()).collect();
    assert_eq!(loads, vec![5, 5]);

    let eleventh = harness.connect("user-10").await;
    assert_eq!(harness.pool.size().await, 3);
    assert_eq!(eleventh.shard.id(), 2);
    assert_eq!(eleventh.shard.load(), 1);

    let stats = harness.pool.stats().await;
    assert_eq!(stats.total_shards, 3);
    assert_eq!(stats.tracked_identities, 11);
}

#[tokio::test]
async fn test_full_outbound_queue_drops_frames() {
    let harness = TestPool::new(
        test_config()
            .shards(1, 1)
            .outbound_capacity(1)
            .build()
            .unwrap(),
    );
    let alice = harness.connect("alice").await;
    let mut bob = harness.connect("bob").await;

    for n in 0..3 {
        alice.send(&Envelope::direct("alice", "bob", ContentKind::Text, format!("burst {n}")));
    }

    let shard = alice.shard.clone();
    assert!(eventually(|| {
        let shard = shard.clone();
        async move { shard.stats().await.dropped >= 1 }
    })
    .await);

    assert!(bob.recv().await.content.starts_with("burst"));
    assert_eq!(bob.connection.pending_frames(), 0);
}

struct PanickingGroups;

#[async_trait]
impl GroupDirectory for PanickingGroups {
    async fn members_of(&self, group_id: &str) -> Result<Vec<String>, BackendError> {
        panic!("group directory blew up on {group_id}");
    }
}

#[tokio::test]
async fn test_panic_in_routing_is_contained() {
    let config = test_config().shards(1, 1).processors(1).build().unwrap();
    let presence = Arc::new(InMemoryPresence::new());
    let services = Services::new(
        presence.clone(),
        Arc::new(InMemoryOfflineStore::new()),
        Arc::new(PanickingGroups),
    );
    let state = build_state(Arc::new(config), services).unwrap();
    let pool = state.pool.clone();

    let mut clients = Vec::new();
    for identity in ["alice", "bob"] {
        let shard = pool.admit(identity).await.unwrap();
        let (connection, outbound) = Connection::new(identity, None, 16);
        shard.register(connection.clone()).await;
        clients.push(TestClient {
            shard,
            connection,
            outbound,
        });
    }
    let mut bob = clients.pop().unwrap();
    let alice = clients.pop().unwrap();

    alice.send(&Envelope::group("alice", "doomed", ContentKind::Text, "boom"));
    let shard = alice.shard.clone();
    assert!(eventually(|| {
        let shard = shard.clone();
        async move { shard.stats().await.faults == 1 }
    })
    .await);

    // The single processor survived and keeps routing.
    alice.send(&Envelope::direct("alice", "bob", ContentKind::Text, "still here"));
    assert_eq!(bob.recv().await.content, "still here");
    assert_eq!(alice.shard.stats().await.faults, 1);

    pool.shutdown();
}

#[tokio::test]
async fn test_shutdown_stops_routing() {
    let harness = TestPool::new(test_config().shards(1, 1).build().unwrap());
    let alice = harness.connect("alice").await;
    let mut bob = harness.connect("bob").await;

    harness.pool.shutdown();
    assert!(harness.pool.is_shut_down());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Either the queue refuses the frame or nobody picks it up.
    let message = Envelope::direct("alice", "bob", ContentKind::Text, "too late");
    let raw = chatshard::shared::envelope::encode(&message).unwrap();
    let _ = alice.shard.enqueue_envelope(message, raw);
    bob.assert_silent(Duration::from_millis(150)).await;
}
