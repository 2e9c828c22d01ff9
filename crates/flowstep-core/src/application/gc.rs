//! Debounced flow-state garbage collection
//!
//! Scheduling arms a single deadline; further requests while it is pending
//! are coalesced. The owner polls [`GarbageCollector::take_due`] from its
//! loop, so there is no background thread.

use std::time::{Duration, Instant};

use crate::domain::flow_state::{FlowStateId, FlowStateTree};
use crate::domain::logs::RuntimeLogs;

/// Schedule-once-then-fire collector
#[derive(Debug, Clone)]
pub struct GarbageCollector {
    interval: Duration,
    deadline: Option<Instant>,
}

impl GarbageCollector {
    /// Create a collector with the given debounce interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Request a collection; returns `false` if one is already pending
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.interval);
        true
    }

    /// Whether a collection is pending
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm the pending collection if its deadline has passed
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Disarm without collecting
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Remove finished flow states that no retained log item references
    ///
    /// Flow states that still have queued tasks are kept as well.
    pub fn collect(tree: &mut FlowStateTree, logs: &RuntimeLogs) -> Vec<FlowStateId> {
        let removed = tree.prune(|fs| logs.references(&fs.id) || fs.active_task_count() > 0);
        if !removed.is_empty() {
            tracing::debug!(removed = removed.len(), remaining = tree.len(), "Collected finished flow states");
        }
        removed
    }
}
