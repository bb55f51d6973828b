//! External Collaborators
//!
//! The routing core only talks to the outside world through these traits:
//!
//! - **`presence`** - online bits per identity
//! - **`offline`** - unread storage for targets that are not connected
//! - **`groups`** - group id → member identities
//! - **`broker`** - optional publish path and presence events
//! - **`assistant`** - chat-completion backend for the assistant identity
//!
//! `Services` bundles one implementation of each and is handed to every
//! shard at construction. Nothing is reached through globals, so tests build
//! isolated pools with in-memory collaborators.

use std::sync::Arc;

/// Online bits
pub mod presence;

/// Unread message storage
pub mod offline;

/// Group membership
pub mod groups;

/// Broker trait and event types
pub mod broker;

/// Chat-completion client
pub mod assistant;

pub use assistant::{Assistant, ChatCompletionClient};
pub use broker::{Broker, BrokerEvent, PresenceEvent, PresenceKind};
pub use groups::{GroupDirectory, InMemoryGroupDirectory, PgGroupDirectory};
pub use offline::{InMemoryOfflineStore, MessageStatus, OfflineMessage, OfflineStore, PgOfflineStore};
pub use presence::{InMemoryPresence, PresenceStore};

/// The assistant identity and the client answering for it
#[derive(Clone)]
pub struct AssistantRoute {
    pub identity: String,
    pub client: Arc<dyn Assistant>,
}

/// Collaborators shared by every shard
#[derive(Clone)]
pub struct Services {
    pub presence: Arc<dyn PresenceStore>,
    pub offline: Arc<dyn OfflineStore>,
    pub groups: Arc<dyn GroupDirectory>,
    pub broker: Option<Arc<dyn Broker>>,
    pub assistant: Option<AssistantRoute>,
}

impl Services {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        offline: Arc<dyn OfflineStore>,
        groups: Arc<dyn GroupDirectory>,
    ) -> Self {
        Self {
            presence,
            offline,
            groups,
            broker: None,
            assistant: None,
        }
    }

    /// Process-local collaborators, no broker, no assistant
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryPresence::new()),
            Arc::new(InMemoryOfflineStore::new()),
            Arc::new(InMemoryGroupDirectory::new()),
        )
    }

    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_assistant(mut self, identity: impl Into<String>, client: Arc<dyn Assistant>) -> Self {
        self.assistant = Some(AssistantRoute {
            identity: identity.into(),
            client,
        });
        self
    }

    pub fn is_assistant(&self, identity: &str) -> bool {
        self.assistant
            .as_ref()
            .is_some_and(|route| route.identity == identity)
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("broker", &self.broker.is_some())
            .field(
                "assistant",
                &self.assistant.as_ref().map(|route| route.identity.as_str()),
            )
            .finish_non_exhaustive()
    }
}
