//! Segment ownership and lifecycle.
//!
//! The [`SegmentManager`] exclusively owns every segment in the system,
//! assigns segment IDs, and is the only component that mutates segment
//! state. The cleaner holds non-owning references during a pass and
//! returns ownership either by handing back sealed survivors
//! ([`SegmentManager::report_cleaned`]) or by abandoning an unsealed
//! survivor.
//!
//! ## Invariants
//!
//! - Segment IDs are assigned here and never reused; a compaction target
//!   inherits its source's identity
//! - A source segment never becomes `Free` before every survivor holding
//!   its live bytes is sealed and durable: `report_cleaned` requires
//!   durable survivors, and reclamation only touches `Freeable` segments
//!   no other component still references
//! - Seglets only enter and leave the pool through the allocator, so the
//!   pool bound holds across rotation, cleaning, and reclamation

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::SegmentGeometry;
use crate::error::{EngineError, EngineResult};
use crate::seglet::SegletAllocator;
use crate::segment::{EntryHeader, LogEntryType, LogSegment, SegmentState, METADATA_BYTES};
use crate::types::{wall_time_secs, EntryLocation, SegmentId};

struct ManagerInner {
    /// All segments occupying memory and backup slots, by ID.
    segments: HashMap<u64, Arc<LogSegment>>,
    /// The open head segment receiving live writes.
    head: Option<Arc<LogSegment>>,
    /// Cleaned segments awaiting seglet reclamation. Not in `segments`.
    freeable: Vec<Arc<LogSegment>>,
    next_id: u64,
}

/// Owns segment creation, state transitions, and the seglet pool.
pub struct SegmentManager {
    geometry: SegmentGeometry,
    backup_slots: u32,
    allocator: SegletAllocator,
    inner: Mutex<ManagerInner>,
}

impl SegmentManager {
    /// Creates a manager over a pool of `total_seglets` seglets whose
    /// closed segments may occupy at most `backup_slots` backup segments.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot hold even one full segment or
    /// `backup_slots` is zero.
    pub fn new(
        geometry: SegmentGeometry,
        total_seglets: u32,
        backup_slots: u32,
    ) -> EngineResult<Self> {
        if total_seglets < geometry.seglets_per_segment() {
            return Err(EngineError::invalid_config(format!(
                "seglet pool of {total_seglets} cannot hold one segment of {}",
                geometry.seglets_per_segment()
            )));
        }
        if backup_slots == 0 {
            return Err(EngineError::invalid_config("backup_slots must be >= 1"));
        }
        Ok(Self {
            geometry,
            backup_slots,
            allocator: SegletAllocator::new(total_seglets),
            inner: Mutex::new(ManagerInner {
                segments: HashMap::new(),
                head: None,
                freeable: Vec::new(),
                next_id: 1,
            }),
        })
    }

    /// Returns the segment geometry.
    #[must_use]
    pub fn geometry(&self) -> SegmentGeometry {
        self.geometry
    }

    /// Returns the seglet allocator.
    #[must_use]
    pub fn allocator(&self) -> &SegletAllocator {
        &self.allocator
    }

    /// Carves out the cleaner's survivor reserve, sized in full segments.
    ///
    /// # Errors
    ///
    /// Propagates the allocator's rejection of an unfillable reserve.
    pub fn initialize_survivor_reserve(&self, segments: u32) -> EngineResult<()> {
        self.allocator
            .set_survivor_reserve(segments * self.geometry.seglets_per_segment())
    }

    /// Appends an entry to the open head segment, rotating to a new head
    /// when the current one fills.
    ///
    /// # Errors
    ///
    /// - [`EngineError::SegletPoolExhausted`] when no seglets remain for a
    ///   new head
    /// - [`EngineError::InvalidOperation`] when the entry cannot fit even
    ///   in an empty segment
    pub fn append(&self, entry_type: LogEntryType, payload: &[u8]) -> EngineResult<EntryLocation> {
        let max_payload =
            self.geometry.segment_size() as usize - METADATA_BYTES - EntryHeader::SIZE;
        if payload.len() > max_payload {
            return Err(EngineError::invalid_operation(format!(
                "entry of {} bytes exceeds segment payload capacity {max_payload}",
                payload.len()
            )));
        }

        let mut inner = self.inner.lock();
        if inner.head.is_none() {
            self.rotate_locked(&mut inner)?;
        }
        if let Some(head) = &inner.head {
            if let Some(offset) = head.append(entry_type, payload) {
                return Ok(EntryLocation::new(head.id(), offset));
            }
        }

        self.rotate_locked(&mut inner)?;
        match inner.head.as_ref().and_then(|head| {
            head.append(entry_type, payload)
                .map(|offset| EntryLocation::new(head.id(), offset))
        }) {
            Some(location) => Ok(location),
            // Size was checked above, so a fresh head always has room.
            None => Err(EngineError::invalid_operation(
                "append failed on a fresh head segment",
            )),
        }
    }

    /// Closes the open head segment, making it a cleaning candidate.
    /// Returns the closed segment, if there was one.
    pub fn close_head(&self) -> Option<Arc<LogSegment>> {
        let mut inner = self.inner.lock();
        self.close_head_locked(&mut inner)
    }

    fn close_head_locked(&self, inner: &mut ManagerInner) -> Option<Arc<LogSegment>> {
        let head = inner.head.take()?;
        let trimmed = head.seal();
        head.set_state(SegmentState::Closed);
        head.set_state(SegmentState::Cleanable);
        self.allocator.release(trimmed);
        debug!(segment = %head.id(), live = head.live_bytes(), "head closed");
        Some(head)
    }

    /// Seals the previous head and installs a fresh one.
    fn rotate_locked(&self, inner: &mut ManagerInner) -> EngineResult<()> {
        self.close_head_locked(inner);

        self.allocator.reserve(self.geometry.seglets_per_segment())?;
        let id = SegmentId::new(inner.next_id);
        inner.next_id += 1;
        let head = Arc::new(LogSegment::new(
            id,
            self.geometry,
            self.geometry.seglets_per_segment(),
            wall_time_secs(),
            SegmentState::Open,
        ));
        inner.segments.insert(id.as_u64(), Arc::clone(&head));
        inner.head = Some(head);
        Ok(())
    }

    /// Allocates a full-size survivor segment from the reserved survivor
    /// pool. Returns `None` when the reserve is exhausted; the cleaner
    /// waits via [`SegmentManager::wait_for_survivors`].
    ///
    /// The survivor is owned by the caller until it is sealed and handed
    /// back through [`SegmentManager::report_cleaned`].
    #[must_use]
    pub fn allocate_survivor(&self) -> Option<Arc<LogSegment>> {
        let seglets = self.geometry.seglets_per_segment();
        if !self.allocator.try_reserve_survivor(seglets) {
            return None;
        }
        let mut inner = self.inner.lock();
        let id = SegmentId::new(inner.next_id);
        inner.next_id += 1;
        drop(inner);
        Some(Arc::new(LogSegment::new(
            id,
            self.geometry,
            seglets,
            wall_time_secs(),
            SegmentState::Survivor,
        )))
    }

    /// Allocates an in-memory compaction target sized to `seglets`,
    /// inheriting `source`'s identity. Draws from the survivor reserve so
    /// compaction can proceed when memory is nearly full.
    #[must_use]
    pub fn allocate_compaction_target(
        &self,
        source: &Arc<LogSegment>,
        seglets: u32,
    ) -> Option<Arc<LogSegment>> {
        let min_seglets = self.geometry.seglets_for_bytes(METADATA_BYTES as u64);
        let seglets = seglets
            .max(min_seglets)
            .min(self.geometry.seglets_per_segment());
        if !self.allocator.try_reserve_survivor(seglets) {
            return None;
        }
        Some(Arc::new(LogSegment::new(
            source.id(),
            self.geometry,
            seglets,
            source.creation_timestamp(),
            SegmentState::Survivor,
        )))
    }

    /// Blocks until the survivor reserve can supply `segments` full
    /// segments. Returns nanoseconds waited.
    pub fn wait_for_survivors(&self, segments: u32) -> u64 {
        self.allocator
            .wait_for_survivor_seglets(segments * self.geometry.seglets_per_segment())
    }

    /// Discards an unsealed survivor, returning its seglets to the pool.
    /// Used when a pass aborts.
    pub fn abandon_survivor(&self, survivor: Arc<LogSegment>) {
        debug_assert_eq!(survivor.state(), SegmentState::Survivor);
        debug_assert!(!survivor.is_sealed());
        self.allocator.release(survivor.seglets());
    }

    /// Seals a survivor and returns its trimmed trailing seglets to the
    /// pool.
    pub fn seal_survivor(&self, survivor: &Arc<LogSegment>) {
        let trimmed = survivor.seal();
        self.allocator.release(trimmed);
    }

    /// Snapshots the current set of cleanable segments.
    #[must_use]
    pub fn cleanable_candidates(&self) -> Vec<Arc<LogSegment>> {
        let inner = self.inner.lock();
        inner
            .segments
            .values()
            .filter(|s| s.state() == SegmentState::Cleanable)
            .cloned()
            .collect()
    }

    /// Selects and claims the best segment for in-memory compaction: the
    /// cleanable segment with the most freeable seglets. Returns `None`
    /// when no segment has a positive count.
    #[must_use]
    pub fn segment_to_compact(&self) -> Option<(Arc<LogSegment>, u32)> {
        let mut candidates: Vec<(u32, Arc<LogSegment>)> = {
            let inner = self.inner.lock();
            inner
                .segments
                .values()
                .filter(|s| s.state() == SegmentState::Cleanable)
                .map(|s| (s.freeable_seglets(), Arc::clone(s)))
                .filter(|(freeable, _)| *freeable > 0)
                .collect()
        };
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        for (freeable, segment) in candidates {
            if segment.try_claim() {
                return Some((segment, freeable));
            }
        }
        None
    }

    /// Atomically retires cleaned sources and admits their survivors.
    ///
    /// Precondition: every survivor is sealed and durable on its required
    /// replicas. Sources become `Freeable`; their seglets return to the
    /// pool once the last pass reference drops (see
    /// [`SegmentManager::reclaim`]).
    pub fn report_cleaned(&self, sources: &[Arc<LogSegment>], survivors: &[Arc<LogSegment>]) {
        let mut inner = self.inner.lock();

        for survivor in survivors {
            debug_assert!(survivor.is_sealed());
            survivor.set_state(SegmentState::Closed);
            survivor.set_state(SegmentState::Cleanable);
            inner
                .segments
                .insert(survivor.id().as_u64(), Arc::clone(survivor));
        }

        for source in sources {
            source.set_state(SegmentState::Freeable);
            inner.segments.remove(&source.id().as_u64());
            inner.freeable.push(Arc::clone(source));
        }

        debug!(
            sources = sources.len(),
            survivors = survivors.len(),
            "cleaned segments reported"
        );
    }

    /// Replaces a compacted segment with its same-identity target. The
    /// old buffer becomes `Freeable` and is reclaimed once pass
    /// references drop.
    pub fn swap_compacted(&self, old: &Arc<LogSegment>, target: Arc<LogSegment>) {
        debug_assert_eq!(old.id(), target.id());
        debug_assert!(target.is_sealed());

        let mut inner = self.inner.lock();
        target.set_state(SegmentState::Closed);
        target.set_state(SegmentState::Cleanable);
        inner.segments.insert(target.id().as_u64(), target);

        old.set_state(SegmentState::Freeable);
        inner.freeable.push(Arc::clone(old));
    }

    /// Releases a range of a retired segment's seglets back to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidOperation`] unless the segment is
    /// `Freeable` (its byte ranges hold no live entries) and the range
    /// lies within the segment.
    pub fn free_seglets(
        &self,
        segment: &Arc<LogSegment>,
        seglets: std::ops::Range<u32>,
    ) -> EngineResult<()> {
        if segment.state() != SegmentState::Freeable {
            return Err(EngineError::invalid_operation(
                "seglets of a non-freeable segment may hold live entries",
            ));
        }
        if seglets.end > segment.seglets() {
            return Err(EngineError::invalid_operation(format!(
                "seglet range {seglets:?} exceeds segment's {}",
                segment.seglets()
            )));
        }
        let count = seglets.end - seglets.start;
        if segment.seglets_released() + count > segment.seglets() {
            return Err(EngineError::invalid_operation(
                "seglet range overlaps already-freed seglets",
            ));
        }
        segment.note_seglets_released(count);
        self.allocator.release(count);
        Ok(())
    }

    /// Sweeps `Freeable` segments no longer referenced outside the
    /// manager: their seglets return to the pool and they become `Free`.
    /// Returns the number of segments reclaimed.
    pub fn reclaim(&self) -> usize {
        let mut reclaimable = Vec::new();
        {
            let mut inner = self.inner.lock();
            let mut remaining = Vec::with_capacity(inner.freeable.len());
            for segment in inner.freeable.drain(..) {
                // One count for this vec; anything more is a pass still
                // holding the segment.
                if Arc::strong_count(&segment) == 1 {
                    reclaimable.push(segment);
                } else {
                    remaining.push(segment);
                }
            }
            inner.freeable = remaining;
        }

        let count = reclaimable.len();
        for segment in reclaimable {
            let seglets = segment.seglets() - segment.seglets_released();
            segment.set_state(SegmentState::Free);
            self.allocator.release(seglets);
            debug!(segment = %segment.id(), seglets, "segment reclaimed");
        }
        count
    }

    /// Quarantines a segment that failed format validation. It is never
    /// selected for cleaning again and its seglets are not reclaimed.
    pub fn quarantine(&self, segment: &Arc<LogSegment>) {
        warn!(segment = %segment.id(), "segment failed validation; quarantined");
        segment.set_state(SegmentState::Quarantined);
    }

    /// Returns whether a segment with this ID is still part of the log.
    #[must_use]
    pub fn contains_segment(&self, id: SegmentId) -> bool {
        self.inner.lock().segments.contains_key(&id.as_u64())
    }

    /// Looks up a segment by ID.
    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<Arc<LogSegment>> {
        self.inner.lock().segments.get(&id.as_u64()).cloned()
    }

    /// Returns the open head segment, if any.
    #[must_use]
    pub fn head(&self) -> Option<Arc<LogSegment>> {
        self.inner.lock().head.clone()
    }

    /// Returns in-memory utilization as an integer percentage of the
    /// seglet pool.
    #[must_use]
    pub fn memory_utilization(&self) -> u32 {
        self.allocator.utilization()
    }

    /// Returns backup disk utilization: segments occupying backup slots
    /// (including cleaned ones not yet reclaimed) over the slot budget.
    #[must_use]
    pub fn disk_utilization(&self) -> u32 {
        let inner = self.inner.lock();
        let occupied = inner.segments.len() + inner.freeable.len();
        (occupied as u64 * 100 / u64::from(self.backup_slots)) as u32
    }

    /// Sums live bytes across all owned segments.
    #[must_use]
    pub fn total_live_bytes(&self) -> u64 {
        let inner = self.inner.lock();
        inner.segments.values().map(|s| s.live_bytes()).sum()
    }
}

impl std::fmt::Debug for SegmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SegmentManager")
            .field("segments", &inner.segments.len())
            .field("freeable", &inner.freeable.len())
            .field("allocator", &self.allocator)
            .finish()
    }
}
