//! Broker consumer
//!
//! Performs the final socket write for frames published through the broker.
//! Direct frames go to the target's local connection; group frames go to
//! every local member except the sender. Presence events are left to the
//! SSE streams.
//!
//! The consumer writes through `ShardPool::deliver_frame`, never through the
//! router, so a published frame is not published again.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::realtime::broadcast::BroadcastBroker;
use crate::backend::services::{BrokerEvent, GroupDirectory};
use crate::backend::shard::ShardPool;

/// Subscribe now and deliver in a background task until `shutdown`
pub fn spawn_consumer(
    broker: &BroadcastBroker,
    pool: Arc<ShardPool>,
    groups: Arc<dyn GroupDirectory>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut events = broker.subscribe();
    tokio::spawn(async move {
        tracing::info!("[Broker] Consumer started");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => consume(&pool, groups.as_ref(), event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("[Broker] Consumer lagged, {} events lost", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::info!("[Broker] Consumer stopped");
    })
}

async fn consume(pool: &ShardPool, groups: &dyn GroupDirectory, event: BrokerEvent) {
    match event {
        BrokerEvent::Direct { target, frame } => deliver(pool, &target, frame).await,
        BrokerEvent::Group { group, sender, frame } => {
            let members = match groups.members_of(&group).await {
                Ok(members) => members,
                Err(err) => {
                    tracing::warn!("[Broker] Could not resolve group {}: {}", group, err);
                    return;
                }
            };
            for member in members.iter().filter(|member| **member != sender) {
                deliver(pool, member, frame.clone()).await;
            }
        }
        BrokerEvent::Presence(_) => {}
    }
}

async fn deliver(pool: &ShardPool, target: &str, frame: Vec<u8>) {
    match pool.deliver_frame(target, frame).await {
        Ok(true) => {}
        Ok(false) => tracing::debug!("[Broker] {} is not connected to this node", target),
        Err(err) => tracing::warn!("[Broker] Delivery to {} failed: {}", target, err),
    }
}
