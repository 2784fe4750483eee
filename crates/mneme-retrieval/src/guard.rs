//! Cross-user visibility filtering and role-alternation repair.
//!
//! In a shared channel, buffered data may interleave several users' turns.
//! Records authored by another user never reach a requester's context; a
//! violation is dropped and logged, not surfaced. Alternation repair drops
//! offending entries outright, never merges them: merged content is how one
//! user's text used to leak into another's effective context.

use tracing::{debug, warn};

use mneme_types::{MemoryRecord, Role};

/// Filters visible records and repairs role alternation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyGuard;

impl ConsistencyGuard {
    pub fn new() -> Self {
        Self
    }

    /// Whether a record may appear in this requester's context: their own
    /// turns, or any assistant turn (the bot's messages are visible to
    /// everyone in the channel).
    pub fn is_visible(&self, record: &MemoryRecord, requesting_user_id: &str) -> bool {
        record.user_id == requesting_user_id || record.role == Role::Assistant
    }

    /// Drop any record authored by a different user, unless it is an
    /// assistant turn.
    pub fn filter_visible(
        &self,
        records: Vec<MemoryRecord>,
        requesting_user_id: &str,
    ) -> Vec<MemoryRecord> {
        let before = records.len();
        let visible: Vec<MemoryRecord> = records
            .into_iter()
            .filter(|r| {
                let ok = self.is_visible(r, requesting_user_id);
                if !ok {
                    warn!(
                        record_id = %r.id,
                        author = %r.user_id,
                        requester = %requesting_user_id,
                        "Consistency violation: dropping another user's record"
                    );
                }
                ok
            })
            .collect();

        if visible.len() < before {
            debug!(
                dropped = before - visible.len(),
                requester = %requesting_user_id,
                "Filtered cross-user records"
            );
        }
        visible
    }

    /// Enforce strict user/assistant alternation by dropping offenders.
    ///
    /// The first entry of each same-role run is kept; later entries in the
    /// run are dropped. Content is never merged.
    pub fn repair_alternation(&self, records: Vec<MemoryRecord>) -> Vec<MemoryRecord> {
        let mut repaired: Vec<MemoryRecord> = Vec::with_capacity(records.len());

        for record in records {
            match repaired.last() {
                Some(prev) if prev.role == record.role => {
                    debug!(
                        record_id = %record.id,
                        role = record.role.as_str(),
                        "Dropping record to repair role alternation"
                    );
                }
                _ => repaired.push(record),
            }
        }

        repaired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mneme_types::MemoryRecord;

    fn turn(user: &str, role: Role, content: &str) -> MemoryRecord {
        MemoryRecord::turn(user, "bot", "shared", role, content)
    }

    #[test]
    fn test_filters_other_users() {
        let guard = ConsistencyGuard::new();
        let records = vec![
            turn("alice", Role::User, "alice says hi"),
            turn("bob", Role::User, "bob's secret"),
            turn("alice", Role::Assistant, "reply to alice"),
            turn("bob", Role::Assistant, "reply to bob"),
        ];

        let visible = guard.filter_visible(records, "alice");

        assert_eq!(visible.len(), 3);
        assert!(
            visible
                .iter()
                .all(|r| r.user_id == "alice" || r.role == Role::Assistant)
        );
        assert!(!visible.iter().any(|r| r.content == "bob's secret"));
    }

    #[test]
    fn test_isolation_is_total_for_user_turns() {
        let guard = ConsistencyGuard::new();
        let records: Vec<_> = (0..10)
            .map(|i| turn("bob", Role::User, &format!("bob {i}")))
            .collect();

        let visible = guard.filter_visible(records, "alice");
        assert!(visible.is_empty());
    }

    #[test]
    fn test_repair_alternation_drops_not_merges() {
        let guard = ConsistencyGuard::new();
        let records = vec![
            turn("alice", Role::User, "one"),
            turn("alice", Role::User, "two"),
            turn("alice", Role::Assistant, "reply"),
            turn("alice", Role::Assistant, "reply again"),
            turn("alice", Role::User, "three"),
        ];

        let repaired = guard.repair_alternation(records);
        let contents: Vec<&str> = repaired.iter().map(|r| r.content.as_str()).collect();

        // First of each run survives; nothing is concatenated.
        assert_eq!(contents, vec!["one", "reply", "three"]);
    }

    #[test]
    fn test_repair_preserves_alternating_input() {
        let guard = ConsistencyGuard::new();
        let records = vec![
            turn("alice", Role::User, "q"),
            turn("alice", Role::Assistant, "a"),
            turn("alice", Role::User, "q2"),
        ];

        let repaired = guard.repair_alternation(records.clone());
        assert_eq!(repaired.len(), 3);
    }
}
