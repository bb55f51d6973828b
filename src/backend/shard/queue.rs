//! Bounded queues with non-blocking offers
//!
//! Every hand-off between tasks (work queue, forward queue, a connection's
//! outbound queue) goes through `BoundedQueue::try_offer`. A full queue
//! hands the item back instead of waiting, and the caller drops it with a
//! diagnostic. Nothing on the routing path ever blocks on a slow consumer.

use tokio::sync::mpsc::{self, error::TrySendError};

/// Why an offer was refused; the item is returned to the caller
#[derive(Debug, PartialEq, Eq)]
pub enum OfferError<T> {
    Full(T),
    Closed(T),
}

impl<T> OfferError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Producer side of a bounded mpsc channel
pub struct BoundedQueue<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

// Manual impl: cloning the sender does not need `T: Clone`.
impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("depth", &self.depth())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue and its consumer end
    pub fn new(name: &'static str, capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { name, tx }, rx)
    }

    /// Enqueue without waiting
    pub fn try_offer(&self, item: T) -> Result<(), OfferError<T>> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => Err(OfferError::Full(item)),
            Err(TrySendError::Closed(item)) => Err(OfferError::Closed(item)),
        }
    }

    /// Items currently waiting
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
