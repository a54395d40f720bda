//! Drain planning shared by the offline queue and the sync orchestrator.
//!
//! Both services load pending items, discard expired ones, order the rest,
//! and gate on unmet dependencies. The policies live here so the two drain
//! paths cannot diverge.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use waypoint_domain::QueueItem;

/// Partition items into (live, expired) against `now`.
///
/// Expired items are purged unconditionally, regardless of remaining retry
/// budget.
pub(crate) fn split_expired(
    items: Vec<QueueItem>,
    now: DateTime<Utc>,
) -> (Vec<QueueItem>, Vec<QueueItem>) {
    items.into_iter().partition(|item| !item.is_expired(now))
}

/// Order items for a drain pass: priority descending, then `created_at`
/// ascending (stable FIFO within a priority band).
pub(crate) fn sort_for_drain(items: &mut [QueueItem]) {
    items.sort_by(|a, b| {
        b.priority.cmp(&a.priority).then_with(|| a.created_at.cmp(&b.created_at))
    });
}

/// Tracks which entities still have pending work, for dependency gating.
///
/// An item whose `depends_on` references an entity still in the gate is not
/// eligible this pass. Entities are released as their items complete, so a
/// dependent enqueued behind its target can run later in the same pass.
pub(crate) struct DependencyGate {
    pending: HashSet<String>,
}

impl DependencyGate {
    pub(crate) fn new(items: &[QueueItem]) -> Self {
        Self { pending: items.iter().map(|item| item.entity_id.clone()).collect() }
    }

    /// Whether the item is blocked by an entity that is still pending.
    pub(crate) fn blocks(&self, item: &QueueItem) -> bool {
        item.depends_on.as_ref().is_some_and(|dep| self.pending.contains(dep))
    }

    /// Release an entity once its item has completed.
    pub(crate) fn release(&mut self, entity_id: &str) {
        self.pending.remove(entity_id);
    }
}
