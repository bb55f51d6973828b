/**
 * In-process Broker
 *
 * `BroadcastBroker` implements the `Broker` collaborator on top of a
 * `tokio::sync::broadcast` channel. Every subscriber (the delivery consumer,
 * each SSE presence stream) receives a copy of every event.
 *
 * # Failure Semantics
 *
 * `broadcast::Sender::send` fails when nobody is subscribed. Publishing a
 * direct or group frame without a consumer therefore returns an error, and
 * the router falls back to writing the frame itself. Presence events without
 * subscribers are simply discarded.
 */

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::backend::error::BackendError;
use crate::backend::services::{Broker, BrokerEvent, PresenceEvent};

#[derive(Debug, Clone)]
pub struct BroadcastBroker {
    tx: broadcast::Sender<BrokerEvent>,
}

impl BroadcastBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, event: BrokerEvent) -> Result<usize, BackendError> {
        self.tx
            .send(event)
            .map_err(|_| BackendError::collaborator("broker", "no subscribers"))
    }
}

#[async_trait]
impl Broker for BroadcastBroker {
    async fn publish_direct(&self, target: &str, frame: Vec<u8>) -> Result<(), BackendError> {
        self.publish(BrokerEvent::Direct {
            target: target.to_string(),
            frame,
        })?;
        Ok(())
    }

    async fn publish_group(&self, group: &str, sender: &str, frame: Vec<u8>) -> Result<(), BackendError> {
        self.publish(BrokerEvent::Group {
            group: group.to_string(),
            sender: sender.to_string(),
            frame,
        })?;
        Ok(())
    }

    async fn publish_presence(&self, event: PresenceEvent) -> Result<(), BackendError> {
        broadcast_event(&self.tx, BrokerEvent::Presence(event));
        Ok(())
    }
}

/// Send to every subscriber, returning how many there were (0 if none)
pub fn broadcast_event(tx: &broadcast::Sender<BrokerEvent>, event: BrokerEvent) -> usize {
    match tx.send(event) {
        Ok(subscribers) => {
            tracing::debug!("[Broker] Event sent to {} subscribers", subscribers);
            subscribers
        }
        Err(_) => {
            tracing::debug!("[Broker] No subscribers for event");
            0
        }
    }
}
