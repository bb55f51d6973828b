//! Broker collaborator
//!
//! Optional decoupling path. When enabled, locally deliverable direct
//! messages are published instead of written straight to the socket, and a
//! consumer (see `realtime::consumer`) performs the final write. A failed
//! publish falls back to direct delivery. Presence changes are published as
//! events for observers such as the SSE stream.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Online,
    Offline,
}

impl PresenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// A connection came or went
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub kind: PresenceKind,
    pub identity: String,
    pub metadata: BTreeMap<String, String>,
    /// RFC 3339
    pub timestamp: String,
}

impl PresenceEvent {
    pub fn new(kind: PresenceKind, identity: impl Into<String>) -> Self {
        Self {
            kind,
            identity: identity.into(),
            metadata: BTreeMap::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Everything that travels through the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Direct { target: String, frame: Vec<u8> },
    Group { group: String, sender: String, frame: Vec<u8> },
    Presence(PresenceEvent),
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish_direct(&self, target: &str, frame: Vec<u8>) -> Result<(), BackendError>;

    async fn publish_group(&self, group: &str, sender: &str, frame: Vec<u8>) -> Result<(), BackendError>;

    async fn publish_presence(&self, event: PresenceEvent) -> Result<(), BackendError>;
}
