/*!
 * Shard
 *
 * A shard owns a disjoint subset of live connections and processes the
 * messages its connections send.
 *
 * # Tasks
 *
 * - N processors share the work queue receiver and route one task at a
 *   time. Each task runs inside a panic boundary: a fault is logged and
 *   the processor moves on to the next task.
 * - One coordinator drains the forward queue (frames handed over by other
 *   shards) into the work queue and sweeps expired fragment assemblies.
 *
 * Both stop when the pool's shutdown token is cancelled.
 *
 * # Load
 *
 * `load` counts admitted connections: the pool increments it on admission,
 * and the shard decrements it exactly once when the connection leaves
 * (unregister, or eviction by a newer connection for the same identity).
 */

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::error::BackendError;
use crate::backend::gateway::connection::Connection;
use crate::backend::services::{PresenceEvent, PresenceKind, Services};
use crate::backend::shard::pool::ShardPool;
use crate::backend::shard::queue::{BoundedQueue, OfferError};
use crate::backend::shard::registry::ConnectionRegistry;
use crate::shared::config::ChatConfig;
use crate::shared::envelope::{self, Envelope};
use crate::shared::fragment::FragmentAssembler;

/// Where a task came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOrigin {
    /// Read from one of this shard's connections
    Inbound,
    /// Handed over by another shard for a connection this shard owns
    Forwarded { target: String },
}

/// A parsed message waiting for a processor
#[derive(Debug)]
pub struct MessageTask {
    pub envelope: Envelope,
    pub raw: Vec<u8>,
    pub origin: TaskOrigin,
}

/// A frame travelling between shards
#[derive(Debug)]
pub struct ForwardedFrame {
    pub target: String,
    pub frame: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct ShardCounters {
    pub(crate) forwarded: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) persisted: AtomicU64,
    pub(crate) faults: AtomicU64,
}

impl ShardCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Monitoring snapshot of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub id: usize,
    pub load: usize,
    pub connections: usize,
    pub pending_fragments: usize,
    pub work_queue_depth: usize,
    pub forward_queue_depth: usize,
    /// Frames received from other shards
    pub forwarded: u64,
    /// Messages written to local connections
    pub delivered: u64,
    pub dropped: u64,
    /// Messages stored for offline targets
    pub persisted: u64,
    /// Tasks abandoned after a fault
    pub faults: u64,
}

pub struct Shard {
    id: usize,
    pub(crate) connections: ConnectionRegistry,
    load: AtomicUsize,
    work: BoundedQueue<MessageTask>,
    forward: BoundedQueue<ForwardedFrame>,
    pub(crate) assembler: FragmentAssembler,
    pub(crate) services: Services,
    pub(crate) pool: Weak<ShardPool>,
    shutdown: CancellationToken,
    pub(crate) counters: ShardCounters,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("load", &self.load())
            .field("work", &self.work)
            .field("forward", &self.forward)
            .finish_non_exhaustive()
    }
}

impl Shard {
    /// Build a shard and start its processors and coordinator
    pub(crate) fn spawn(
        id: usize,
        config: &ChatConfig,
        services: Services,
        pool: Weak<ShardPool>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (work, work_rx) = BoundedQueue::new("work", config.shard.work_queue_capacity);
        let (forward, forward_rx) = BoundedQueue::new("forward", config.shard.forward_queue_capacity);

        let shard = Arc::new(Self {
            id,
            connections: ConnectionRegistry::new(),
            load: AtomicUsize::new(0),
            work,
            forward,
            assembler: FragmentAssembler::new(&config.fragment),
            services,
            pool,
            shutdown,
            counters: ShardCounters::default(),
        });

        let processors = config.shard.processors.max(1);
        let work_rx = Arc::new(Mutex::new(work_rx));
        for worker in 0..processors {
            tokio::spawn(Arc::clone(&shard).run_processor(worker, Arc::clone(&work_rx)));
        }
        let sweep_every = config.fragment.sweep_interval().max(Duration::from_secs(1));
        tokio::spawn(Arc::clone(&shard).run_coordinator(forward_rx, sweep_every));

        tracing::info!("[Shard {}] Started with {} processors", id, processors);
        shard
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn load(&self) -> usize {
        self.load.load(Ordering::Acquire)
    }

    pub(crate) fn acquire_load(&self) {
        self.load.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_load(&self) {
        let _ = self
            .load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| Some(load.saturating_sub(1)));
    }

    pub fn assembler(&self) -> &FragmentAssembler {
        &self.assembler
    }

    /// Local lookup
    pub async fn connection(&self, identity: &str) -> Option<Arc<Connection>> {
        self.connections.get(identity).await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.len().await
    }

    /// Take ownership of a connection
    ///
    /// A connection already holding the identity, on this shard or any other,
    /// is evicted without a presence-offline notification.
    pub async fn register(self: &Arc<Self>, connection: Arc<Connection>) {
        connection.assign_shard(self.id);
        let identity = connection.identity().to_string();

        if let Some(stale) = self.connections.insert(Arc::clone(&connection)).await {
            if stale.session() != connection.session() {
                tracing::info!("[Shard {}] Replacing stale connection for {}", self.id, identity);
                self.retire(&stale);
            }
        }

        if let Some(pool) = self.pool.upgrade() {
            if let Some(previous) = pool.track(&identity, Arc::clone(self)).await {
                if previous.id() != self.id {
                    previous.evict(&identity, connection.session()).await;
                }
            }
        }

        if let Err(err) = self.services.presence.set_online(&identity).await {
            tracing::warn!("[Shard {}] Failed to set {} online: {}", self.id, identity, err);
        }
        self.publish_presence(PresenceKind::Online, &connection).await;

        tracing::info!(
            "[Shard {}] Registered {} ({} connections, load {})",
            self.id,
            identity,
            self.connections.len().await,
            self.load()
        );
    }

    /// Tear a connection down; a no-op if it is no longer registered here
    ///
    /// Returns true for the call that actually removed it.
    pub async fn unregister(&self, connection: &Arc<Connection>) -> bool {
        let identity = connection.identity();
        if !self.connections.remove_if_current(connection).await {
            tracing::debug!("[Shard {}] {} already removed", self.id, identity);
            return false;
        }
        self.retire(connection);

        // The pool clears presence itself, under its index lock.
        let still_ours = match self.pool.upgrade() {
            Some(pool) => pool.untrack(identity, self.id).await,
            None => {
                if let Err(err) = self.services.presence.set_offline(identity).await {
                    tracing::warn!("[Shard {}] Failed to set {} offline: {}", self.id, identity, err);
                }
                true
            }
        };
        if still_ours {
            self.publish_presence(PresenceKind::Offline, connection).await;
        }

        tracing::info!(
            "[Shard {}] Unregistered {} ({} connections, load {})",
            self.id,
            identity,
            self.connections.len().await,
            self.load()
        );
        true
    }

    /// Drop a stale connection for `identity` unless it is session `keep`
    pub(crate) async fn evict(&self, identity: &str, keep: Uuid) {
        if let Some(stale) = self.connections.remove_unless(identity, keep).await {
            tracing::info!("[Shard {}] Evicted stale connection for {}", self.id, identity);
            self.retire(&stale);
        }
    }

    // Must only run after the connection left the registry.
    fn retire(&self, connection: &Connection) {
        if connection.close_outbound() {
            self.release_load();
        }
    }

    async fn publish_presence(&self, kind: PresenceKind, connection: &Connection) {
        let Some(broker) = &self.services.broker else {
            return;
        };
        let mut event = PresenceEvent::new(kind, connection.identity())
            .with("connection_time", connection.connected_at().to_rfc3339())
            .with("shard_id", self.id);
        if let Some(addr) = connection.remote_addr() {
            event = event.with("remote_addr", addr);
        }
        if let Err(err) = broker.publish_presence(event).await {
            tracing::debug!("[Shard {}] Presence event not published: {}", self.id, err);
        }
    }

    /// Parse a raw frame and queue it for routing
    ///
    /// `forwarded_for` names the local connection a frame handed over by
    /// another shard is meant for; `None` marks a frame read from one of this
    /// shard's own connections. Undecodable frames and a full work queue both
    /// drop the message.
    pub fn enqueue(&self, raw: Vec<u8>, forwarded_for: Option<String>) -> Result<(), BackendError> {
        let envelope = match envelope::decode(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                ShardCounters::bump(&self.counters.dropped);
                tracing::warn!(
                    "[Shard {}] Dropping undecodable frame ({} bytes): {}",
                    self.id,
                    raw.len(),
                    err
                );
                return Err(err.into());
            }
        };
        let origin = match forwarded_for {
            Some(target) => TaskOrigin::Forwarded { target },
            None => TaskOrigin::Inbound,
        };
        self.submit(MessageTask { envelope, raw, origin })
    }

    /// Queue an envelope the caller already decoded
    pub fn enqueue_envelope(&self, envelope: Envelope, raw: Vec<u8>) -> Result<(), BackendError> {
        self.submit(MessageTask {
            envelope,
            raw,
            origin: TaskOrigin::Inbound,
        })
    }

    fn submit(&self, task: MessageTask) -> Result<(), BackendError> {
        match self.work.try_offer(task) {
            Ok(()) => Ok(()),
            Err(OfferError::Full(task)) => {
                ShardCounters::bump(&self.counters.dropped);
                tracing::warn!(
                    "[Shard {}] Work queue full, dropping message {} from {}",
                    self.id,
                    task.envelope.message_id,
                    task.envelope.from
                );
                Err(BackendError::backpressure("work"))
            }
            Err(OfferError::Closed(_)) => {
                Err(BackendError::state(format!("shard {} is shut down", self.id)))
            }
        }
    }

    /// Hand a frame to this shard from another shard
    pub(crate) fn offer_forward(&self, target: &str, frame: Vec<u8>) -> Result<(), BackendError> {
        let forwarded = ForwardedFrame {
            target: target.to_string(),
            frame,
        };
        match self.forward.try_offer(forwarded) {
            Ok(()) => Ok(()),
            Err(OfferError::Full(_)) => {
                tracing::warn!("[Shard {}] Forward queue full, dropping frame for {}", self.id, target);
                Err(BackendError::backpressure("forward"))
            }
            Err(OfferError::Closed(_)) => {
                Err(BackendError::state(format!("shard {} is shut down", self.id)))
            }
        }
    }

    /// Write a frame straight to a local connection, bypassing routing
    ///
    /// Used by the broker consumer. Returns false when the identity is not
    /// connected here.
    pub async fn deliver_frame(&self, identity: &str, frame: Vec<u8>) -> Result<bool, BackendError> {
        let Some(connection) = self.connections.get(identity).await else {
            return Ok(false);
        };
        match connection.send(frame) {
            Ok(()) => {
                ShardCounters::bump(&self.counters.delivered);
                Ok(true)
            }
            Err(err) => {
                ShardCounters::bump(&self.counters.dropped);
                Err(err)
            }
        }
    }

    async fn run_processor(self: Arc<Self>, worker: usize, queue: Arc<Mutex<mpsc::Receiver<MessageTask>>>) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                task = async { queue.lock().await.recv().await } => task,
            };
            let Some(task) = next else {
                break;
            };

            let message_id = task.envelope.message_id.clone();
            match AssertUnwindSafe(self.route(task)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!("[Shard {}] Routing message {:?} failed: {}", self.id, message_id, err);
                }
                Err(fault) => {
                    ShardCounters::bump(&self.counters.faults);
                    tracing::error!(
                        "[Shard {}] Processor {} abandoned message {:?} after a fault: {}",
                        self.id,
                        worker,
                        message_id,
                        fault_message(fault.as_ref())
                    );
                }
            }
        }
        tracing::debug!("[Shard {}] Processor {} stopped", self.id, worker);
    }

    async fn run_coordinator(self: Arc<Self>, mut forward_rx: mpsc::Receiver<ForwardedFrame>, sweep_every: Duration) {
        let mut sweep = tokio::time::interval_at(Instant::now() + sweep_every, sweep_every);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                forwarded = forward_rx.recv() => {
                    let Some(ForwardedFrame { target, frame }) = forwarded else {
                        break;
                    };
                    ShardCounters::bump(&self.counters.forwarded);
                    // enqueue() logs its own drops
                    let _ = self.enqueue(frame, Some(target));
                }
                _ = sweep.tick() => {
                    let expired = self.assembler.sweep_expired();
                    if expired > 0 {
                        tracing::info!("[Shard {}] Swept {} expired fragment assemblies", self.id, expired);
                    }
                }
            }
        }
        tracing::debug!("[Shard {}] Coordinator stopped", self.id);
    }

    pub async fn stats(&self) -> ShardStats {
        ShardStats {
            id: self.id,
            load: self.load(),
            connections: self.connections.len().await,
            pending_fragments: self.assembler.pending_count(),
            work_queue_depth: self.work.depth(),
            forward_queue_depth: self.forward.depth(),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            faults: self.counters.faults.load(Ordering::Relaxed),
        }
    }
}

fn fault_message(fault: &(dyn Any + Send)) -> String {
    if let Some(message) = fault.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = fault.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown fault".to_string()
    }
}
