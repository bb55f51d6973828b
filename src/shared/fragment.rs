/*!
 * Fragment Assembler
 *
 * Splits envelopes whose binary encoding exceeds the configured frame size
 * into fragments, and reassembles fragments back into the original
 * envelope on the receiving side.
 *
 * # Fragment Format
 *
 * The parent envelope is serialized once and cut into `max_fragment_size`
 * chunks. Each fragment is an ordinary envelope that keeps the parent's
 * routing fields and carries:
 *
 * - the parent's `message_id`
 * - `fragment_index` (0-based) and `total_fragments`
 * - `checksum`: hex SHA-256 of the complete serialized parent
 * - the chunk as its `payload`
 *
 * # Reassembly
 *
 * Assemblies are keyed by message id. Completion is decided by the set of
 * distinct indices received, so arrival order does not matter and a
 * re-delivered index replaces the earlier copy. Assemblies that do not
 * complete within `assembly_timeout` are discarded by `sweep_expired`.
 */

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::shared::config::FragmentConfig;
use crate::shared::envelope::{self, now_millis, Envelope};
use crate::shared::error::SharedError;

/// Fragmentation and reassembly failures
///
/// All of these reject a single fragment or assembly; other in-flight
/// assemblies are unaffected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("fragment has no message id")]
    MissingMessageId,

    #[error("message {message_id}: invalid fragment total {total} (cap {cap})")]
    InvalidTotal {
        message_id: String,
        total: u32,
        cap: u32,
    },

    #[error("message {message_id}: fragment index {index} out of range for {total} fragments")]
    IndexOutOfRange {
        message_id: String,
        index: u32,
        total: u32,
    },

    #[error("message {message_id}: fragment declares {got} fragments, assembly expects {expected}")]
    TotalMismatch {
        message_id: String,
        expected: u32,
        got: u32,
    },

    #[error("message {message_id}: fragment checksum does not match assembly")]
    ChecksumMismatch { message_id: String },

    #[error("message {message_id}: reassembled bytes fail checksum verification")]
    IntegrityFailure { message_id: String },

    #[error("envelope of {size} bytes needs {required} fragments, cap is {cap}")]
    TooManyFragments { size: usize, required: usize, cap: u32 },

    #[error(transparent)]
    Codec(#[from] SharedError),
}

/// Result of feeding one envelope to [`FragmentAssembler::process_fragment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// The envelope is whole: either it never was fragmented, or this was the last piece
    Complete(Envelope),
    /// More fragments are needed
    Pending { received: usize, total: u32 },
}

struct Assembly {
    total: u32,
    checksum: String,
    parts: BTreeMap<u32, Vec<u8>>,
    created_at: Instant,
}

impl Assembly {
    fn new(total: u32, checksum: String) -> Self {
        Self {
            total,
            checksum,
            parts: BTreeMap::new(),
            created_at: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.parts.len() == self.total as usize
    }

    fn reassemble(self, message_id: &str) -> Result<Envelope, FragmentError> {
        let size = self.parts.values().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(size);
        for chunk in self.parts.values() {
            bytes.extend_from_slice(chunk);
        }
        if checksum_hex(&bytes) != self.checksum {
            return Err(FragmentError::IntegrityFailure {
                message_id: message_id.to_string(),
            });
        }
        let mut original = envelope::decode(&bytes)?;
        original.clear_fragment_fields();
        Ok(original)
    }
}

/// Lowercase hex SHA-256
pub fn checksum_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Chunking and reassembly state for one shard
pub struct FragmentAssembler {
    max_fragment_size: usize,
    max_fragments: u32,
    assembly_timeout: Duration,
    pending: Mutex<HashMap<String, Assembly>>,
}

impl FragmentAssembler {
    pub fn new(config: &FragmentConfig) -> Self {
        Self {
            max_fragment_size: config.max_fragment_size.max(1),
            max_fragments: config.max_fragments,
            assembly_timeout: config.assembly_timeout(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_fragment_size(&self) -> usize {
        self.max_fragment_size
    }

    // A panic while holding the lock leaves the map usable.
    fn pending(&self) -> MutexGuard<'_, HashMap<String, Assembly>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True iff the envelope's binary encoding exceeds the maximum fragment size
    pub fn should_fragment(&self, envelope: &Envelope) -> Result<bool, FragmentError> {
        Ok(envelope::encoded_len(envelope)? > self.max_fragment_size as u64)
    }

    /// Split an envelope into ordered fragments
    ///
    /// A missing message id or timestamp is filled in before serializing, so
    /// every fragment and the reassembled envelope agree on them.
    pub fn fragment(&self, envelope: &Envelope) -> Result<Vec<Envelope>, FragmentError> {
        let mut original = envelope.clone();
        if original.message_id.is_empty() {
            original.message_id = Uuid::new_v4().to_string();
        }
        if original.timestamp == 0 {
            original.timestamp = now_millis();
        }

        let bytes = envelope::encode(&original)?;
        let required = bytes.len().div_ceil(self.max_fragment_size);
        if required > self.max_fragments as usize {
            return Err(FragmentError::TooManyFragments {
                size: bytes.len(),
                required,
                cap: self.max_fragments,
            });
        }

        let checksum = checksum_hex(&bytes);
        let total = required as u32;
        let fragments: Vec<Envelope> = bytes
            .chunks(self.max_fragment_size)
            .enumerate()
            .map(|(index, chunk)| Envelope {
                from: original.from.clone(),
                to: original.to.clone(),
                content_type: original.content_type,
                message_type: original.message_type,
                message_id: original.message_id.clone(),
                is_fragmented: true,
                fragment_index: index as u32,
                total_fragments: total,
                timestamp: original.timestamp,
                checksum: checksum.clone(),
                payload: chunk.to_vec(),
                ..Default::default()
            })
            .collect();

        tracing::debug!(
            "[Fragment] Split message {} ({} bytes) into {} fragments",
            original.message_id,
            bytes.len(),
            total
        );
        Ok(fragments)
    }

    /// Accept one fragment, returning the original envelope once all pieces are in
    pub fn process_fragment(&self, fragment: Envelope) -> Result<FragmentOutcome, FragmentError> {
        if !fragment.is_fragmented {
            return Ok(FragmentOutcome::Complete(fragment));
        }

        let message_id = fragment.message_id.clone();
        if message_id.is_empty() {
            return Err(FragmentError::MissingMessageId);
        }
        let total = fragment.total_fragments;
        if total == 0 || total > self.max_fragments {
            return Err(FragmentError::InvalidTotal {
                message_id,
                total,
                cap: self.max_fragments,
            });
        }
        if fragment.fragment_index >= total {
            return Err(FragmentError::IndexOutOfRange {
                message_id,
                index: fragment.fragment_index,
                total,
            });
        }

        let mut pending = self.pending();
        let assembly = pending.entry(message_id.clone()).or_insert_with(|| {
            tracing::debug!("[Fragment] New assembly for message {} ({} fragments)", message_id, total);
            Assembly::new(total, fragment.checksum.clone())
        });

        if assembly.total != total {
            return Err(FragmentError::TotalMismatch {
                message_id,
                expected: assembly.total,
                got: total,
            });
        }
        if assembly.checksum != fragment.checksum {
            return Err(FragmentError::ChecksumMismatch { message_id });
        }

        assembly.parts.insert(fragment.fragment_index, fragment.payload);
        if !assembly.is_complete() {
            return Ok(FragmentOutcome::Pending {
                received: assembly.parts.len(),
                total,
            });
        }

        let Some(assembly) = pending.remove(&message_id) else {
            return Err(FragmentError::MissingMessageId);
        };
        drop(pending);

        let original = assembly.reassemble(&message_id)?;
        tracing::debug!("[Fragment] Reassembled message {}", message_id);
        Ok(FragmentOutcome::Complete(original))
    }

    /// Drop assemblies older than the assembly timeout
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    /// Same as [`sweep_expired`](Self::sweep_expired) with an explicit clock
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut pending = self.pending();
        let before = pending.len();
        pending.retain(|message_id, assembly| {
            let keep = now.saturating_duration_since(assembly.created_at) < self.assembly_timeout;
            if !keep {
                tracing::warn!(
                    "[Fragment] Discarding expired assembly {} ({}/{} fragments)",
                    message_id,
                    assembly.parts.len(),
                    assembly.total
                );
            }
            keep
        });
        before - pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}
