//! Backup replication interface.
//!
//! The cleaner never frees a source segment until every survivor holding
//! one of its live entries is durable on the required replicas. The
//! replication machinery itself lives outside this crate; the cleaner
//! only needs a way to submit a sealed segment and wait for durability.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::segment::LogSegment;

/// Ships sealed segments to remote replicas.
///
/// Implementations retry failures indefinitely; from the cleaner's point
/// of view replication is eventually successful but may block. The
/// required replication factor is the implementor's concern.
pub trait ReplicaManager: Send + Sync {
    /// Begins replicating a sealed segment. The returned handle resolves
    /// once the segment is durable on all required replicas.
    fn replicate(&self, segment: &Arc<LogSegment>) -> ReplicationHandle;
}

struct HandleShared {
    durable: Mutex<bool>,
    resolved: Condvar,
}

/// Future-like handle for one segment's replication.
///
/// Cloning yields another view of the same replication; the producer side
/// keeps a clone and calls [`ReplicationHandle::mark_durable`] when the
/// last replica acknowledges.
#[derive(Clone)]
pub struct ReplicationHandle {
    shared: Arc<HandleShared>,
}

impl ReplicationHandle {
    /// Creates a handle that is not yet durable.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            shared: Arc::new(HandleShared {
                durable: Mutex::new(false),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Creates a handle that is already durable.
    #[must_use]
    pub fn durable() -> Self {
        Self {
            shared: Arc::new(HandleShared {
                durable: Mutex::new(true),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Marks the replication durable and wakes waiters.
    pub fn mark_durable(&self) {
        let mut durable = self.shared.durable.lock();
        *durable = true;
        self.shared.resolved.notify_all();
    }

    /// Returns whether the segment is durable, without blocking.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        *self.shared.durable.lock()
    }

    /// Blocks until the segment is durable.
    pub fn wait(&self) {
        let mut durable = self.shared.durable.lock();
        while !*durable {
            self.shared.resolved.wait(&mut durable);
        }
    }
}

impl std::fmt::Debug for ReplicationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationHandle")
            .field("durable", &self.is_durable())
            .finish()
    }
}

/// Replica manager for deployments without backups: every segment is
/// durable the moment it is submitted.
#[derive(Debug, Default)]
pub struct NullReplicaManager;

impl NullReplicaManager {
    /// Creates a no-op replica manager.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ReplicaManager for NullReplicaManager {
    fn replicate(&self, _segment: &Arc<LogSegment>) -> ReplicationHandle {
        ReplicationHandle::durable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn durable_handle_resolves_immediately() {
        let handle = ReplicationHandle::durable();
        assert!(handle.is_durable());
        handle.wait();
    }

    #[test]
    fn pending_handle_blocks_until_marked() {
        let handle = ReplicationHandle::pending();
        assert!(!handle.is_durable());

        let waiter = {
            let handle = handle.clone();
            thread::spawn(move || handle.wait())
        };
        thread::sleep(Duration::from_millis(10));
        assert!(!waiter.is_finished());

        handle.mark_durable();
        waiter.join().unwrap();
        assert!(handle.is_durable());
    }
}
