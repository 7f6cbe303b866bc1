//! Controllable replica manager for durability-ordering tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use emberlog_core::{LogSegment, ReplicaManager, ReplicationHandle, SegmentId};

/// Replica manager whose durability can be stalled and released on
/// demand, recording every segment submitted to it.
#[derive(Debug, Default)]
pub struct StubReplicaManager {
    stalled: AtomicBool,
    pending: Mutex<Vec<ReplicationHandle>>,
    submitted: Mutex<Vec<SegmentId>>,
}

impl StubReplicaManager {
    /// Creates a stub that acknowledges durability immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes future replications hang until [`StubReplicaManager::release_all`].
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::Release);
    }

    /// Marks every stalled replication durable and stops stalling.
    pub fn release_all(&self) {
        self.stalled.store(false, Ordering::Release);
        for handle in self.pending.lock().drain(..) {
            handle.mark_durable();
        }
    }

    /// Returns the segments submitted for replication, in order.
    #[must_use]
    pub fn submitted(&self) -> Vec<SegmentId> {
        self.submitted.lock().clone()
    }
}

impl ReplicaManager for StubReplicaManager {
    fn replicate(&self, segment: &Arc<LogSegment>) -> ReplicationHandle {
        self.submitted.lock().push(segment.id());
        if self.stalled.load(Ordering::Acquire) {
            let handle = ReplicationHandle::pending();
            self.pending.lock().push(handle.clone());
            handle
        } else {
            ReplicationHandle::durable()
        }
    }
}
