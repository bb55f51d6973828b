/*!
 * Connection
 *
 * One live WebSocket to one client identity. The struct is shared (`Arc`)
 * between the owning shard's map, the read loop, the write loop and the
 * routing tasks that enqueue frames for it.
 *
 * # Lifecycle
 *
 * `Admitted → Active → Draining → Removed`
 *
 * - Draining starts when the cancellation token fires (transport error,
 *   close frame, heartbeat timeout, or eviction by a newer connection).
 * - Removed is reached when the shard has deleted it from its map; only
 *   then is the outbound queue closed, and only once.
 */

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::backend::error::BackendError;
use crate::backend::shard::queue::{BoundedQueue, OfferError};
use crate::shared::envelope::{self, now_millis, Envelope};

/// Shard id of a connection not yet registered
pub const UNASSIGNED_SHARD: usize = usize::MAX;

/// Monitoring view of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub identity: String,
    pub remote_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub shard_id: usize,
}

pub struct Connection {
    identity: String,
    session: Uuid,
    remote_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    last_heartbeat: AtomicI64,
    outbound: BoundedQueue<Vec<u8>>,
    outbound_closed: AtomicBool,
    cancel: CancellationToken,
    shard_id: AtomicUsize,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.identity)
            .field("session", &self.session)
            .field("shard_id", &self.shard_id())
            .field("closed", &self.is_outbound_closed())
            .finish()
    }
}

impl Connection {
    /// Create a connection and the receiving end of its outbound queue
    ///
    /// The receiver belongs to the write loop.
    pub fn new(
        identity: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        outbound_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (outbound, rx) = BoundedQueue::new("outbound", outbound_capacity);
        let connection = Arc::new(Self {
            identity: identity.into(),
            session: Uuid::new_v4(),
            remote_addr,
            connected_at: Utc::now(),
            last_heartbeat: AtomicI64::new(now_millis()),
            outbound,
            outbound_closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            shard_id: AtomicUsize::new(UNASSIGNED_SHARD),
        });
        (connection, rx)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Distinguishes reconnects under the same identity
    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn shard_id(&self) -> usize {
        self.shard_id.load(Ordering::Acquire)
    }

    pub(crate) fn assign_shard(&self, shard_id: usize) {
        self.shard_id.store(shard_id, Ordering::Release);
    }

    /// Offer an encoded frame to the write loop
    pub fn send(&self, frame: Vec<u8>) -> Result<(), BackendError> {
        if self.is_outbound_closed() {
            return Err(BackendError::transport(format!(
                "connection {} is closed",
                self.identity
            )));
        }
        match self.outbound.try_offer(frame) {
            Ok(()) => Ok(()),
            Err(OfferError::Full(_)) => Err(BackendError::backpressure("outbound")),
            Err(OfferError::Closed(_)) => Err(BackendError::transport(format!(
                "write loop of {} has exited",
                self.identity
            ))),
        }
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), BackendError> {
        self.send(envelope::encode(envelope)?)
    }

    /// Record client liveness
    pub fn touch(&self) {
        self.last_heartbeat.store(now_millis(), Ordering::Release);
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        let millis = self.last_heartbeat.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(self.connected_at)
    }

    pub fn heartbeat_age(&self) -> Duration {
        let elapsed = now_millis() - self.last_heartbeat.load(Ordering::Acquire);
        Duration::from_millis(elapsed.max(0) as u64)
    }

    /// Signal both loops to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Close the outbound queue; true only for the call that closed it
    ///
    /// Callers must have removed the connection from its shard's map first.
    pub(crate) fn close_outbound(&self) -> bool {
        let first = !self.outbound_closed.swap(true, Ordering::AcqRel);
        if first {
            self.cancel.cancel();
        }
        first
    }

    pub fn is_outbound_closed(&self) -> bool {
        self.outbound_closed.load(Ordering::Acquire)
    }

    pub fn pending_frames(&self) -> usize {
        self.outbound.depth()
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            identity: self.identity.clone(),
            remote_addr: self.remote_addr.map(|addr| addr.to_string()),
            connected_at: self.connected_at,
            last_heartbeat: self.last_heartbeat(),
            shard_id: self.shard_id(),
        }
    }
}
