//! Message routing
//!
//! Runs on a shard processor for every queued task.
//!
//! ```text
//! Forwarded{target}          → local connection, else offline store
//! Inbound, empty `to`        → system broadcast to every pooled connection
//! Inbound, assistant target  → completion request, reply re-enqueued here
//! Inbound, direct            → deliver(to)
//! Inbound, group             → one broker group publish, then offline members
//!                              stored; without a broker, deliver(member) for
//!                              every member but the sender
//!
//! deliver(target):
//!   offline            → offline store (fragments reassembled first)
//!   on this shard      → broker publish, falling back to the socket
//!   on another shard   → that shard's forward queue
//!   not in this pool   → offline store
//! ```
//!
//! Oversized envelopes are split once, before fan-out; every target gets the
//! same fragment frames. A client-sent fragment is fed to the assembler at
//! most once per task, however many offline targets share it. Call signals
//! are never stored offline.

use std::sync::Arc;

use uuid::Uuid;

use crate::backend::error::BackendError;
use crate::backend::gateway::connection::Connection;
use crate::backend::services::Broker;
use crate::backend::shard::worker::{MessageTask, Shard, ShardCounters, TaskOrigin};
use crate::shared::envelope::{self, ContentKind, DeliveryKind, Envelope};
use crate::shared::fragment::{FragmentAssembler, FragmentOutcome};

/// How a message left the router for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to a connection on this shard
    Local,
    /// Handed to the broker
    Published,
    /// Offered to another shard
    Forwarded { shard: usize },
    /// Stored as unread
    Stored,
    /// A fragment held until the rest arrives
    Buffered,
    /// Not storable for an offline target
    Discarded,
}

/// The copy an offline target gets, resolved at most once per task
pub(crate) struct OfflineCopy<'a> {
    envelope: &'a Envelope,
    // None until resolved; Some(None) while sibling fragments are missing
    whole: Option<Option<Envelope>>,
}

impl<'a> OfflineCopy<'a> {
    pub(crate) fn new(envelope: &'a Envelope) -> Self {
        Self { envelope, whole: None }
    }

    fn resolve(&mut self, assembler: &FragmentAssembler) -> Result<Option<&Envelope>, BackendError> {
        if !self.envelope.is_fragmented {
            return Ok(Some(self.envelope));
        }
        if self.whole.is_none() {
            // A rejected fragment is not retried for the next target.
            self.whole = Some(None);
            if let FragmentOutcome::Complete(whole) = assembler.process_fragment(self.envelope.clone())? {
                self.whole = Some(Some(whole));
            }
        }
        Ok(self.whole.as_ref().and_then(Option::as_ref))
    }
}

impl Shard {
    pub(crate) async fn route(self: &Arc<Self>, task: MessageTask) -> Result<(), BackendError> {
        let MessageTask { envelope, raw, origin } = task;
        match origin {
            TaskOrigin::Forwarded { target } => self.route_forwarded(&target, &envelope, raw).await,
            TaskOrigin::Inbound if envelope.is_system_broadcast() => {
                self.broadcast_system(raw).await;
                Ok(())
            }
            TaskOrigin::Inbound => match envelope.delivery_kind() {
                DeliveryKind::Direct => self.route_direct(envelope, raw).await,
                DeliveryKind::Group => self.route_group(envelope, raw).await,
            },
        }
    }

    async fn route_forwarded(&self, target: &str, envelope: &Envelope, raw: Vec<u8>) -> Result<(), BackendError> {
        if let Some(connection) = self.connections.get(target).await {
            self.write_frames(&connection, std::slice::from_ref(&raw))?;
            return Ok(());
        }
        // The target left this shard while the frame was in flight.
        if self.services.presence.is_online(target).await? {
            ShardCounters::bump(&self.counters.dropped);
            tracing::warn!(
                "[Shard {}] Forwarded frame for {} arrived after it moved; dropped",
                self.id(),
                target
            );
            return Ok(());
        }
        self.store_offline(target, &mut OfflineCopy::new(envelope)).await.map(|_| ())
    }

    async fn route_direct(self: &Arc<Self>, envelope: Envelope, raw: Vec<u8>) -> Result<(), BackendError> {
        if self.services.is_assistant(&envelope.to) {
            return self.route_to_assistant(envelope).await;
        }
        let frames = self.outbound_frames(&envelope, raw)?;
        let mut copy = OfflineCopy::new(&envelope);
        let delivery = self.deliver(&envelope.to, &mut copy, &frames).await?;
        tracing::debug!(
            "[Shard {}] {} -> {}: {:?}",
            self.id(),
            envelope.from,
            envelope.to,
            delivery
        );
        Ok(())
    }

    async fn route_group(&self, envelope: Envelope, raw: Vec<u8>) -> Result<(), BackendError> {
        let members = self.services.groups.members_of(&envelope.to).await?;
        if members.is_empty() {
            tracing::debug!("[Shard {}] Group {} has no members", self.id(), envelope.to);
            return Ok(());
        }
        let frames = self.outbound_frames(&envelope, raw)?;

        let published = match &self.services.broker {
            Some(broker) => match publish_group_all(broker.as_ref(), &envelope, &frames).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(
                        "[Shard {}] Broker publish for group {} failed, delivering per member: {}",
                        self.id(),
                        envelope.to,
                        err
                    );
                    false
                }
            },
            None => false,
        };

        let mut copy = OfflineCopy::new(&envelope);
        let mut reached = 0_usize;
        for member in members.iter().filter(|member| **member != envelope.from) {
            let outcome = if published {
                self.settle_published(member, &mut copy).await
            } else {
                self.deliver(member, &mut copy, &frames).await
            };
            match outcome {
                Ok(_) => reached += 1,
                Err(err) => tracing::warn!(
                    "[Shard {}] Group {} delivery to {} failed: {}",
                    self.id(),
                    envelope.to,
                    member,
                    err
                ),
            }
        }
        tracing::debug!(
            "[Shard {}] Group {} message from {} reached {} members",
            self.id(),
            envelope.to,
            envelope.from,
            reached
        );
        Ok(())
    }

    async fn route_to_assistant(self: &Arc<Self>, envelope: Envelope) -> Result<(), BackendError> {
        let Some(route) = self.services.assistant.clone() else {
            return Ok(());
        };
        let prompt = if envelope.is_fragmented {
            match self.assembler.process_fragment(envelope)? {
                FragmentOutcome::Complete(whole) => whole,
                FragmentOutcome::Pending { .. } => return Ok(()),
            }
        } else {
            envelope
        };

        let shard = Arc::clone(self);
        tokio::spawn(async move {
            let answer = match route.client.complete(&prompt.content).await {
                Ok(answer) => answer,
                Err(err) => {
                    tracing::warn!(
                        "[Shard {}] Assistant request from {} failed: {}",
                        shard.id(),
                        prompt.from,
                        err
                    );
                    return;
                }
            };
            let reply = Envelope::direct(route.identity.as_str(), prompt.from.as_str(), ContentKind::Text, answer)
                .with_message_id(Uuid::new_v4().to_string());
            match envelope::encode(&reply) {
                Ok(raw) => {
                    // enqueue_envelope logs a full queue itself
                    let _ = shard.enqueue_envelope(reply, raw);
                }
                Err(err) => tracing::warn!("[Shard {}] Could not encode assistant reply: {}", shard.id(), err),
            }
        });
        Ok(())
    }

    /// Send to every connection in the pool
    pub(crate) async fn broadcast_system(&self, raw: Vec<u8>) -> usize {
        let targets = match self.pool.upgrade() {
            Some(pool) => pool.all_connections().await,
            None => self.connections.snapshot().await,
        };
        let reached = targets
            .iter()
            .filter(|connection| connection.send(raw.clone()).is_ok())
            .count();
        tracing::info!(
            "[Shard {}] System broadcast reached {} of {} connections",
            self.id(),
            reached,
            targets.len()
        );
        reached
    }

    /// Split once if needed; a client-fragmented frame passes through as is
    fn outbound_frames(&self, envelope: &Envelope, raw: Vec<u8>) -> Result<Vec<Vec<u8>>, BackendError> {
        if envelope.is_fragmented || !self.assembler.should_fragment(envelope)? {
            return Ok(vec![raw]);
        }
        let fragments = self.assembler.fragment(envelope)?;
        tracing::debug!(
            "[Shard {}] Split message {} into {} fragments",
            self.id(),
            fragments.first().map(|f| f.message_id.as_str()).unwrap_or_default(),
            fragments.len()
        );
        fragments
            .iter()
            .map(|fragment| envelope::encode(fragment).map_err(BackendError::from))
            .collect()
    }

    pub(crate) async fn deliver(
        &self,
        target: &str,
        copy: &mut OfflineCopy<'_>,
        frames: &[Vec<u8>],
    ) -> Result<Delivery, BackendError> {
        if !self.services.presence.is_online(target).await? {
            return self.store_offline(target, copy).await;
        }
        if let Some(connection) = self.connections.get(target).await {
            return self.deliver_local(&connection, frames).await;
        }

        let owner = match self.pool.upgrade() {
            Some(pool) => pool.locate(target).await,
            None => None,
        };
        match owner {
            // Registered here after the first lookup.
            Some(owner) if owner.id() == self.id() => match self.connections.get(target).await {
                Some(connection) => self.deliver_local(&connection, frames).await,
                None => self.store_offline(target, copy).await,
            },
            Some(owner) => {
                for frame in frames {
                    owner.offer_forward(target, frame.clone())?;
                }
                Ok(Delivery::Forwarded { shard: owner.id() })
            }
            // The broker consumer only reaches this pool's connections.
            None => {
                tracing::warn!(
                    "[Shard {}] {} is online but not connected to this pool; storing",
                    self.id(),
                    target
                );
                self.store_offline(target, copy).await
            }
        }
    }

    /// After a group publish the consumer writes to every connected member;
    /// the rest are stored
    async fn settle_published(&self, target: &str, copy: &mut OfflineCopy<'_>) -> Result<Delivery, BackendError> {
        if self.services.presence.is_online(target).await? {
            let connected = match self.pool.upgrade() {
                Some(pool) => pool.locate(target).await.is_some(),
                None => self.connections.get(target).await.is_some(),
            };
            if connected {
                return Ok(Delivery::Published);
            }
        }
        self.store_offline(target, copy).await
    }

    async fn deliver_local(&self, connection: &Connection, frames: &[Vec<u8>]) -> Result<Delivery, BackendError> {
        if let Some(broker) = &self.services.broker {
            match publish_all(broker.as_ref(), connection.identity(), frames).await {
                Ok(()) => return Ok(Delivery::Published),
                Err(err) => tracing::warn!(
                    "[Shard {}] Broker publish for {} failed, writing directly: {}",
                    self.id(),
                    connection.identity(),
                    err
                ),
            }
        }
        self.write_frames(connection, frames)?;
        Ok(Delivery::Local)
    }

    fn write_frames(&self, connection: &Connection, frames: &[Vec<u8>]) -> Result<(), BackendError> {
        for frame in frames {
            if let Err(err) = connection.send(frame.clone()) {
                ShardCounters::bump(&self.counters.dropped);
                tracing::warn!(
                    "[Shard {}] Dropping frame for {}: {}",
                    self.id(),
                    connection.identity(),
                    err
                );
                return Err(err);
            }
        }
        ShardCounters::bump(&self.counters.delivered);
        Ok(())
    }

    /// Persist as unread; fragments wait for their siblings
    async fn store_offline(&self, target: &str, copy: &mut OfflineCopy<'_>) -> Result<Delivery, BackendError> {
        let Some(whole) = copy.resolve(&self.assembler)? else {
            return Ok(Delivery::Buffered);
        };
        if whole.content_kind().is_call_signal() {
            tracing::debug!(
                "[Shard {}] Not storing call signal from {} for offline {}",
                self.id(),
                whole.from,
                target
            );
            return Ok(Delivery::Discarded);
        }
        let message_id = if whole.message_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            whole.message_id.clone()
        };

        self.services
            .offline
            .persist_unread(&whole.from, target, &whole.content, &message_id)
            .await?;
        ShardCounters::bump(&self.counters.persisted);
        tracing::debug!(
            "[Shard {}] Stored message {} for offline {}",
            self.id(),
            message_id,
            target
        );
        Ok(Delivery::Stored)
    }
}

async fn publish_group_all(broker: &dyn Broker, envelope: &Envelope, frames: &[Vec<u8>]) -> Result<(), BackendError> {
    for frame in frames {
        broker.publish_group(&envelope.to, &envelope.from, frame.clone()).await?;
    }
    Ok(())
}

async fn publish_all(broker: &dyn Broker, target: &str, frames: &[Vec<u8>]) -> Result<(), BackendError> {
    for frame in frames {
        broker.publish_direct(target, frame.clone()).await?;
    }
    Ok(())
}
