//! Event log entry and export types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conductor_contracts::message::Message;

/// One response message in the hash chain.
///
/// Changing any field, or any byte of the embedded message, invalidates
/// `this_hash` and the `prev_hash` of every later entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the chain, starting at 0. Never reused after a purge.
    pub sequence: u64,

    /// When the log accepted the message. Retention is measured from here.
    pub recorded_at: DateTime<Utc>,

    pub message: Message,

    /// `this_hash` of the previous entry, or the chain anchor for the first
    /// retained entry.
    pub prev_hash: String,

    pub this_hash: String,
}

impl LogEntry {
    /// The anchor of a chain that has never been purged.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A point-in-time copy of the retained chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogExport {
    pub entries: Vec<LogEntry>,

    /// `prev_hash` expected of the first entry: the genesis hash, or the hash
    /// of the last purged entry.
    pub anchor_hash: String,

    /// `this_hash` of the last entry; equal to `anchor_hash` when empty.
    pub terminal_hash: String,

    pub exported_at: DateTime<Utc>,
}
