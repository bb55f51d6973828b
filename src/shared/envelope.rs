/*!
 * Chat Envelope
 *
 * The wire-level message exchanged between clients and the router. Every
 * binary WebSocket frame carries exactly one envelope encoded with bincode;
 * text frames carry the same structure as JSON and are normalised to the
 * binary encoding as soon as they are read.
 *
 * # Routing Fields
 *
 * - `to` empty means a system broadcast
 * - `message_type == 1` is a direct message, anything else addresses a group
 * - `content_type` describes the payload (text, file, image, ...)
 *
 * # Fragmentation Fields
 *
 * `is_fragmented`, `fragment_index`, `total_fragments` and `checksum` are
 * only populated on fragments produced by the `FragmentAssembler`. A fragment
 * keeps the routing fields of its parent so it can be routed unchanged.
 */

use serde::{Deserialize, Serialize};

use crate::shared::error::SharedError;

/// `type` value of heartbeat envelopes
pub const HEARTBEAT_TYPE: &str = "heartbeat";

/// `content` of the server's heartbeat reply
pub const PONG_CONTENT: &str = "pong";

/// `message_type` value of a direct (one-to-one) message
pub const DIRECT_MESSAGE: i32 = 1;

/// `message_type` value used for group messages
pub const GROUP_MESSAGE: i32 = 2;

/// Wire envelope
///
/// Field order is part of the bincode wire format. Do not reorder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    /// Sender identity
    pub from: String,
    /// Target identity, or group id for group messages; empty for system broadcasts
    pub to: String,
    /// Control frame type (`heartbeat`); empty for chat traffic
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Text content, or file suffix information for binary content
    pub content: String,
    /// Content kind code, see [`ContentKind`]
    pub content_type: i32,
    /// Delivery kind code, see [`DeliveryKind`]
    pub message_type: i32,
    /// Unique message id; assigned by the fragmenter when empty
    pub message_id: String,
    /// Set on fragments only
    pub is_fragmented: bool,
    /// 0-based fragment position
    pub fragment_index: u32,
    /// Declared fragment count of the parent message
    pub total_fragments: u32,
    /// Unix epoch milliseconds
    pub timestamp: i64,
    /// Hex SHA-256 of the serialized parent envelope (fragments only)
    pub checksum: String,
    /// Raw bytes: binary content, or a fragment's chunk
    pub payload: Vec<u8>,
}

/// What an envelope carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    File,
    Image,
    Voice,
    Video,
    VoiceCall,
    VideoCall,
    FriendRequest,
    Other(i32),
}

impl ContentKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Text,
            2 => Self::File,
            3 => Self::Image,
            4 => Self::Voice,
            5 => Self::Video,
            6 => Self::VoiceCall,
            7 => Self::VideoCall,
            8 => Self::FriendRequest,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Text => 1,
            Self::File => 2,
            Self::Image => 3,
            Self::Voice => 4,
            Self::Video => 5,
            Self::VoiceCall => 6,
            Self::VideoCall => 7,
            Self::FriendRequest => 8,
            Self::Other(code) => code,
        }
    }

    /// Call signalling carries no user content worth storing offline
    pub fn is_call_signal(self) -> bool {
        matches!(self, Self::VoiceCall | Self::VideoCall)
    }
}

/// How an envelope is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    Direct,
    Group,
}

impl Envelope {
    /// Build a direct message from `from` to `to`
    pub fn direct(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: ContentKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            content: content.into(),
            content_type: kind.code(),
            message_type: DIRECT_MESSAGE,
            timestamp: now_millis(),
            ..Default::default()
        }
    }

    /// Build a message addressed to every member of `group`
    pub fn group(
        from: impl Into<String>,
        group: impl Into<String>,
        kind: ContentKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_type: GROUP_MESSAGE,
            ..Self::direct(from, group, kind, content)
        }
    }

    /// Attach raw bytes
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Set an explicit message id
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// A client heartbeat
    pub fn heartbeat(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            frame_type: HEARTBEAT_TYPE.to_string(),
            timestamp: now_millis(),
            ..Default::default()
        }
    }

    /// The server's answer to a heartbeat
    pub fn pong() -> Self {
        Self {
            frame_type: HEARTBEAT_TYPE.to_string(),
            content: PONG_CONTENT.to_string(),
            timestamp: now_millis(),
            ..Default::default()
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.frame_type == HEARTBEAT_TYPE
    }

    pub fn is_system_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    pub fn content_kind(&self) -> ContentKind {
        ContentKind::from_code(self.content_type)
    }

    pub fn delivery_kind(&self) -> DeliveryKind {
        if self.message_type == DIRECT_MESSAGE {
            DeliveryKind::Direct
        } else {
            DeliveryKind::Group
        }
    }

    /// Reset fragmentation metadata after reassembly
    pub fn clear_fragment_fields(&mut self) {
        self.is_fragmented = false;
        self.fragment_index = 0;
        self.total_fragments = 0;
        self.checksum.clear();
    }
}

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Encode an envelope for a binary frame
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, SharedError> {
    Ok(bincode::serialize(envelope)?)
}

/// Decode a binary frame
pub fn decode(bytes: &[u8]) -> Result<Envelope, SharedError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Decode a JSON text frame
pub fn decode_text(text: &str) -> Result<Envelope, SharedError> {
    Ok(serde_json::from_str(text)?)
}

/// Size of the binary encoding without allocating it
pub fn encoded_len(envelope: &Envelope) -> Result<u64, SharedError> {
    Ok(bincode::serialized_size(envelope)?)
}
