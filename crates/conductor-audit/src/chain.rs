//! Hashing and chain verification.
//!
//! Hash input layout (bytes, in order):
//!   1. sequence as 8-byte little-endian
//!   2. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   3. recorded_at as RFC 3339 UTF-8 bytes
//!   4. compact JSON of the message

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use conductor_contracts::{
    error::{ConductorError, ConductorResult},
    message::Message,
};

use crate::entry::LogEntry;

/// SHA-256 over one entry's fields, as lowercase hex.
pub fn hash_entry(
    sequence: u64,
    prev_hash: &str,
    recorded_at: DateTime<Utc>,
    message: &Message,
) -> ConductorResult<String> {
    let message_json = serde_json::to_vec(message).map_err(|e| ConductorError::InvalidMessage {
        reason: format!("message {} is not serializable: {e}", message.id()),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(recorded_at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update(&message_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Check linkage from `anchor` and recompute every hash.
///
/// An empty chain is valid.
pub fn verify_chain(entries: &[LogEntry], anchor: &str) -> bool {
    let mut expected_prev = anchor.to_string();

    for entry in entries {
        if entry.prev_hash != expected_prev {
            return false;
        }
        match hash_entry(entry.sequence, &entry.prev_hash, entry.recorded_at, &entry.message) {
            Ok(recomputed) if recomputed == entry.this_hash => {}
            _ => return false,
        }
        expected_prev = entry.this_hash.clone();
    }

    true
}
