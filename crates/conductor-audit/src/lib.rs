//! # conductor-audit
//!
//! Append-only, SHA-256 hash-chained event log of the responses produced
//! during workflow execution.
//!
//! ## Overview
//!
//! Every response the orchestrator records is wrapped in a `LogEntry` that
//! links to the previous entry by hash. Editing any entry breaks the chain
//! and is caught by `verify_chain`. Retention purges drop the oldest entries
//! and move the chain anchor forward so what remains still verifies.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conductor_audit::HashChainedEventLog;
//!
//! let log = HashChainedEventLog::new().with_retention_seconds(limits.event_retention_seconds);
//! let orchestrator = Orchestrator::new(Box::new(log));
//! ```

pub mod chain;
pub mod entry;
pub mod log;

pub use chain::{hash_entry, verify_chain};
pub use entry::{LogEntry, LogExport};
pub use log::HashChainedEventLog;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use conductor_contracts::message::{payload_from_json, CorrelationId, Message};
    use conductor_core::traits::EventLog;

    use super::*;

    fn response(n: i64, correlation: CorrelationId) -> Message {
        Message::new("a1", "orchestrator", "workflow_result", payload_from_json(json!({ "n": n })).unwrap())
            .with_correlation(correlation)
    }

    fn filled(count: i64) -> (HashChainedEventLog, CorrelationId) {
        let log = HashChainedEventLog::new();
        let correlation = CorrelationId::new();
        for n in 0..count {
            log.append(&response(n, correlation)).unwrap();
        }
        (log, correlation)
    }

    // ── Chain construction ───────────────────────────────────────────────────

    #[test]
    fn first_entry_links_to_genesis() {
        let (log, _) = filled(1);
        let export = log.export();

        assert_eq!(export.entries[0].prev_hash, LogEntry::GENESIS_HASH);
        assert_eq!(export.entries[0].sequence, 0);
        assert_eq!(export.terminal_hash, export.entries[0].this_hash);
    }

    #[test]
    fn entries_link_in_append_order() {
        let (log, _) = filled(3);
        let export = log.export();

        for pair in export.entries.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].this_hash);
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }
        assert!(log.verify_integrity());
    }

    #[test]
    fn empty_log_is_valid() {
        let log = HashChainedEventLog::new();
        assert!(log.verify_integrity());
        assert!(log.is_empty());
        assert_eq!(log.export().terminal_hash, LogEntry::GENESIS_HASH);
    }

    #[test]
    fn entries_and_correlation_lookup() {
        let (log, correlation) = filled(2);
        log.append(&response(9, CorrelationId::new())).unwrap();

        assert_eq!(log.len(), 3);
        assert_eq!(log.by_correlation(correlation).len(), 2);
    }

    // ── Tamper detection ─────────────────────────────────────────────────────

    #[test]
    fn edited_payload_is_detected() {
        let (log, correlation) = filled(3);
        log.tamper(|entries| entries[1].message = response(42, correlation));

        assert!(!log.verify_integrity());
    }

    #[test]
    fn removed_entry_is_detected() {
        let (log, _) = filled(3);
        log.tamper(|entries| {
            entries.remove(1);
        });

        assert!(!log.verify_integrity());
    }

    #[test]
    fn exported_chain_verifies_after_json_round_trip() {
        let (log, _) = filled(3);
        let json = serde_json::to_string(&log.export()).unwrap();
        let export: LogExport = serde_json::from_str(&json).unwrap();

        assert!(verify_chain(&export.entries, &export.anchor_hash));
    }

    // ── Retention ────────────────────────────────────────────────────────────

    #[test]
    fn purge_drops_only_expired_and_keeps_chain_valid() {
        let log = HashChainedEventLog::new().with_retention_seconds(3600);
        let correlation = CorrelationId::new();
        let now = Utc::now();
        log.append_at(&response(0, correlation), now - Duration::hours(3)).unwrap();
        log.append_at(&response(1, correlation), now - Duration::hours(2)).unwrap();
        log.append_at(&response(2, correlation), now - Duration::minutes(5)).unwrap();

        let dropped_hash = log.export().entries[1].this_hash.clone();
        assert_eq!(log.purge_expired(now), 2);

        let export = log.export();
        assert_eq!(export.entries.len(), 1);
        assert_eq!(export.entries[0].sequence, 2);
        assert_eq!(export.anchor_hash, dropped_hash);
        assert!(log.verify_integrity());

        // Sequence numbers keep counting after a purge.
        log.append(&response(3, correlation)).unwrap();
        assert_eq!(log.export().entries[1].sequence, 3);
        assert!(log.verify_integrity());
    }

    #[test]
    fn purge_without_retention_is_a_no_op() {
        let (log, _) = filled(2);
        assert_eq!(log.purge_expired(Utc::now() + Duration::days(365)), 0);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn enforce_retention_purges_against_the_clock() {
        let log = HashChainedEventLog::new().with_retention_seconds(60);
        let correlation = CorrelationId::new();
        log.append_at(&response(0, correlation), Utc::now() - Duration::hours(1)).unwrap();
        log.append(&response(1, correlation)).unwrap();

        let as_trait: &dyn EventLog = &log;
        assert_eq!(as_trait.enforce_retention(), 1);
        assert_eq!(log.len(), 1);
        assert!(log.verify_integrity());
    }
}
