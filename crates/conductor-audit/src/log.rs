//! `HashChainedEventLog`: the `EventLog` used by the orchestrator.
//!
//! Entries live in a `Vec` behind a `Mutex`. Appends from concurrent workflow
//! executions are serialized, so entries of one execution never interleave
//! mid-write and the chain stays linear.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use conductor_contracts::{error::ConductorResult, message::Message};
use conductor_core::traits::EventLog;

use crate::{
    chain::{hash_entry, verify_chain},
    entry::{LogEntry, LogExport},
};

// ── Internal mutable state ────────────────────────────────────────────────────

struct ChainState {
    entries: Vec<LogEntry>,
    next_sequence: u64,
    last_hash: String,
    /// `this_hash` of the newest purged entry, or genesis.
    anchor_hash: String,
}

// ── Public log ────────────────────────────────────────────────────────────────

/// An append-only, SHA-256 hash-chained record of workflow responses.
pub struct HashChainedEventLog {
    state: Mutex<ChainState>,
    retention: Option<Duration>,
}

impl Default for HashChainedEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HashChainedEventLog {
    /// A log that retains everything.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                entries: Vec::new(),
                next_sequence: 0,
                last_hash: LogEntry::GENESIS_HASH.to_string(),
                anchor_hash: LogEntry::GENESIS_HASH.to_string(),
            }),
            retention: None,
        }
    }

    /// Entries older than `seconds` become eligible for `purge_expired`.
    pub fn with_retention_seconds(mut self, seconds: u64) -> Self {
        self.retention = i64::try_from(seconds).ok().and_then(Duration::try_seconds);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append with an explicit acceptance time.
    pub fn append_at(&self, message: &Message, recorded_at: DateTime<Utc>) -> ConductorResult<()> {
        let mut state = self.lock();
        let sequence = state.next_sequence;
        let prev_hash = state.last_hash.clone();
        let this_hash = hash_entry(sequence, &prev_hash, recorded_at, message)?;

        debug!(
            sequence,
            message_id = %message.id(),
            correlation_id = %message.correlation_id().map(|c| c.to_string()).unwrap_or_default(),
            "event appended"
        );

        state.entries.push(LogEntry {
            sequence,
            recorded_at,
            message: message.clone(),
            prev_hash,
            this_hash: this_hash.clone(),
        });
        state.next_sequence += 1;
        state.last_hash = this_hash;
        Ok(())
    }

    /// Drop entries older than the retention window, oldest first. The hash
    /// of the newest dropped entry becomes the anchor, so the remaining chain
    /// still verifies. Returns how many entries were dropped.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let cutoff = now - retention;

        let mut state = self.lock();
        let expired = state
            .entries
            .iter()
            .take_while(|entry| entry.recorded_at < cutoff)
            .count();
        if expired == 0 {
            return 0;
        }

        let dropped: Vec<LogEntry> = state.entries.drain(..expired).collect();
        if let Some(newest) = dropped.last() {
            state.anchor_hash = newest.this_hash.clone();
        }
        info!(
            purged = expired,
            remaining = state.entries.len(),
            anchor_hash = %state.anchor_hash,
            "expired events purged"
        );
        expired
    }

    /// True when every retained entry links to its predecessor and its hash
    /// recomputes.
    pub fn verify_integrity(&self) -> bool {
        let state = self.lock();
        verify_chain(&state.entries, &state.anchor_hash)
    }

    pub fn export(&self) -> LogExport {
        let state = self.lock();
        LogExport {
            entries: state.entries.clone(),
            anchor_hash: state.anchor_hash.clone(),
            terminal_hash: state.last_hash.clone(),
            exported_at: Utc::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, f: impl FnOnce(&mut Vec<LogEntry>)) {
        f(&mut self.lock().entries);
    }
}

// ── EventLog impl ─────────────────────────────────────────────────────────────

impl EventLog for HashChainedEventLog {
    fn append(&self, message: &Message) -> ConductorResult<()> {
        self.append_at(message, Utc::now())
    }

    fn entries(&self) -> Vec<Message> {
        self.lock().entries.iter().map(|e| e.message.clone()).collect()
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn enforce_retention(&self) -> usize {
        self.purge_expired(Utc::now())
    }
}
