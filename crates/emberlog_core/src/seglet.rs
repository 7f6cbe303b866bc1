//! Seglet pool accounting.
//!
//! Seglets are the fixed-size sub-allocation unit of segments and the unit
//! of memory reclamation. The allocator tracks two pools over one fixed
//! budget: the default pool that backs head segments, and a survivor
//! reserve the cleaner draws from so that cleaning can always make
//! progress even when memory is nearly full.
//!
//! ## Invariants
//!
//! - Outstanding seglets never exceed the pool size: every reservation is
//!   checked against the free counts, never assumed
//! - Released seglets refill the survivor reserve up to its target before
//!   returning to the default pool
//! - Reserved-but-unused survivor seglets count as free for utilization,
//!   so carving out the reserve does not distort cleaning triggers

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{EngineError, EngineResult};

struct Pools {
    free_default: u32,
    free_survivor: u32,
    /// Seglet count the survivor reserve refills toward.
    reserve_target: u32,
}

/// Tracks free seglets across all segments.
pub struct SegletAllocator {
    total: u32,
    pools: Mutex<Pools>,
    /// Signalled whenever seglets are released, for cleaners blocked on
    /// survivor availability.
    released: Condvar,
}

impl SegletAllocator {
    /// Creates an allocator managing `total` seglets, all initially free.
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            total,
            pools: Mutex::new(Pools {
                free_default: total,
                free_survivor: 0,
                reserve_target: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Returns the pool size.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Returns the seglets free in the default pool.
    #[must_use]
    pub fn free_default(&self) -> u32 {
        self.pools.lock().free_default
    }

    /// Returns the seglets free in the survivor reserve.
    #[must_use]
    pub fn free_survivor(&self) -> u32 {
        self.pools.lock().free_survivor
    }

    /// Returns the outstanding (reserved by live segments) seglet count.
    #[must_use]
    pub fn in_use(&self) -> u32 {
        let pools = self.pools.lock();
        self.total - pools.free_default - pools.free_survivor
    }

    /// Returns default-pool utilization as an integer percentage: the
    /// survivor reserve is excluded from both sides, so carving it out
    /// does not move the cleaner's triggers.
    #[must_use]
    pub fn utilization(&self) -> u32 {
        let pools = self.pools.lock();
        let default_total = self.total - pools.reserve_target;
        if default_total == 0 {
            return 0;
        }
        let used = default_total.saturating_sub(pools.free_default);
        (u64::from(used) * 100 / u64::from(default_total)) as u32
    }

    /// Sets the survivor reserve target and moves as many free seglets as
    /// possible into it immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SegletPoolExhausted`] if the target exceeds
    /// the pool size; a reserve that can never be filled would deadlock
    /// the cleaner.
    pub fn set_survivor_reserve(&self, target: u32) -> EngineResult<()> {
        if target > self.total {
            return Err(EngineError::SegletPoolExhausted {
                requested: target,
                available: self.total,
            });
        }
        let mut pools = self.pools.lock();
        pools.reserve_target = target;
        let shortfall = target.saturating_sub(pools.free_survivor);
        let moved = shortfall.min(pools.free_default);
        pools.free_default -= moved;
        pools.free_survivor += moved;
        Ok(())
    }

    /// Reserves `count` seglets from the default pool.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SegletPoolExhausted`] when the default pool
    /// cannot satisfy the reservation.
    pub fn reserve(&self, count: u32) -> EngineResult<()> {
        let mut pools = self.pools.lock();
        if pools.free_default < count {
            return Err(EngineError::SegletPoolExhausted {
                requested: count,
                available: pools.free_default,
            });
        }
        pools.free_default -= count;
        Ok(())
    }

    /// Attempts to reserve `count` seglets from the survivor reserve
    /// without blocking.
    #[must_use]
    pub fn try_reserve_survivor(&self, count: u32) -> bool {
        let mut pools = self.pools.lock();
        if pools.free_survivor < count {
            return false;
        }
        pools.free_survivor -= count;
        true
    }

    /// Blocks until the survivor reserve holds `count` free seglets.
    /// Does not take the seglets. Returns the nanoseconds spent waiting.
    ///
    /// Progress is guaranteed by the cleaner's configuration: a pass can
    /// never hold more survivor seglets than the reserve target, so every
    /// wait is eventually satisfied by a completing pass or a sealing
    /// trim.
    pub fn wait_for_survivor_seglets(&self, count: u32) -> u64 {
        let started = Instant::now();
        let mut pools = self.pools.lock();
        while pools.free_survivor < count {
            self.released.wait(&mut pools);
        }
        started.elapsed().as_nanos() as u64
    }

    /// Releases `count` seglets back to the allocator. The survivor
    /// reserve refills to its target first; the rest return to the default
    /// pool.
    pub fn release(&self, count: u32) {
        if count == 0 {
            return;
        }
        let mut pools = self.pools.lock();
        let outstanding = self.total - pools.free_default - pools.free_survivor;
        debug_assert!(count <= outstanding, "released more seglets than reserved");

        let shortfall = pools.reserve_target.saturating_sub(pools.free_survivor);
        let to_reserve = shortfall.min(count);
        pools.free_survivor += to_reserve;
        pools.free_default += count - to_reserve;
        drop(pools);
        self.released.notify_all();
    }
}

impl std::fmt::Debug for SegletAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pools = self.pools.lock();
        f.debug_struct("SegletAllocator")
            .field("total", &self.total)
            .field("free_default", &pools.free_default)
            .field("free_survivor", &pools.free_survivor)
            .field("reserve_target", &pools.reserve_target)
            .finish()
    }
}
