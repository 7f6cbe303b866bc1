//! The log cleaner.
//!
//! Reclaims space from the append-only log by relocating live entries and
//! freeing dead ones, running in parallel with live writers on its own
//! worker threads. Two modes share the machinery:
//!
//! - **In-memory compaction** rewrites one segment in place (same
//!   identity, fewer seglets). It frees memory cheaply but cannot free
//!   tombstones, whose covered segments live elsewhere.
//! - **Disk cleaning** relocates the live entries of several sources into
//!   fresh survivor segments, replicates the survivors, and retires the
//!   sources, freeing both memory and backup space.
//!
//! Candidates are ranked by cost-benefit (see [`policy`]); live entries
//! are relocated oldest-first so old and new data segregate into
//! different survivors, keeping old survivors dense and making young ones
//! cheap to clean again.
//!
//! ## Invariants
//!
//! - A source segment is never freed before every survivor holding its
//!   live bytes is sealed and durable
//! - Passes are the unit of recovery: a pass that aborts leaves the
//!   segment manager's canonical state untouched and returns unsealed
//!   survivors to the pool
//! - The shared candidate list is only touched under its lock, and never
//!   across relocation or I/O

mod metrics;
mod policy;

pub use metrics::{CleanerMetrics, MetricsSnapshot, PassMetrics, PassSnapshot};
pub use policy::{cost_benefit_score, sort_by_cost_benefit};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::CleanerConfig;
use crate::error::EngineResult;
use crate::handler::{EntryHandler, EntryRelocator};
use crate::manager::SegmentManager;
use crate::replica::{ReplicaManager, ReplicationHandle};
use crate::segment::{EntryHeader, LogEntryType, LogSegment, SegmentState};
use crate::types::{wall_time_secs, EntryLocation};

/// A live entry recorded during extraction, with its timestamp cached so
/// age sorting never re-reads payloads. Large live sets are sorted in
/// bulk, so the record is kept to 16 bytes.
#[derive(Debug, Clone, Copy)]
struct LiveEntry {
    /// Index of the source segment within the pass.
    segment: u32,
    /// Payload offset within the source.
    offset: u32,
    /// Embedded wall-clock creation time, from the handler.
    timestamp: u32,
    /// Payload length.
    length: u32,
}

const _: () = assert!(std::mem::size_of::<LiveEntry>() == 16);

/// What one work iteration accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkReport {
    /// An in-memory compaction pass completed.
    pub compacted: bool,
    /// A disk cleaning pass completed.
    pub disk_pass: bool,
}

impl WorkReport {
    /// Returns whether the iteration found any work.
    #[must_use]
    pub fn did_work(&self) -> bool {
        self.compacted || self.disk_pass
    }
}

/// Background engine that defragments the log's closed segments.
pub struct LogCleaner {
    config: CleanerConfig,
    manager: Arc<SegmentManager>,
    replica_manager: Arc<dyn ReplicaManager>,
    handler: Arc<dyn EntryHandler>,
    metrics: CleanerMetrics,

    /// Cleaning candidates shared across workers. Refreshed from the
    /// segment manager at the start of each disk pass; guarded by a
    /// short-held lock.
    candidates: Mutex<Vec<Arc<LogSegment>>>,

    /// Compaction work since the last disk pass, for the rolling write
    /// cost that forces a disk pass when compaction stops paying off.
    rolling_relocated: AtomicU64,
    rolling_freed: AtomicU64,

    stop: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl LogCleaner {
    /// Creates a cleaner and carves its survivor reserve out of the
    /// manager's seglet pool (scaled by the worker count).
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration or a reserve the
    /// pool cannot hold.
    pub fn new(
        config: CleanerConfig,
        manager: Arc<SegmentManager>,
        replica_manager: Arc<dyn ReplicaManager>,
        handler: Arc<dyn EntryHandler>,
    ) -> EngineResult<Arc<Self>> {
        config.validate()?;
        manager.initialize_survivor_reserve(
            config.survivor_segments_to_reserve * config.num_threads as u32,
        )?;

        Ok(Arc::new(Self {
            config,
            manager,
            replica_manager,
            handler,
            metrics: CleanerMetrics::new(),
            candidates: Mutex::new(Vec::new()),
            rolling_relocated: AtomicU64::new(0),
            rolling_freed: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }))
    }

    /// Spawns the configured number of worker threads. Idempotent while
    /// running.
    pub fn start(self: &Arc<Self>) {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return;
        }
        self.stop.store(false, Ordering::Release);
        for _ in 0..self.config.num_threads {
            let cleaner = Arc::clone(self);
            threads.push(thread::spawn(move || cleaner.worker_loop()));
        }
    }

    /// Signals workers to exit and joins them. In-flight passes finish
    /// before a worker observes the flag, so partially produced survivors
    /// are never abandoned with the live directory pointing at them.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                error!("cleaner worker panicked");
            }
        }
    }

    /// Returns a snapshot of the cleaner's counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn worker_loop(&self) {
        debug!("cleaner worker started");
        while !self.stop.load(Ordering::Acquire) {
            let started = Instant::now();
            let report = self.tick();
            self.metrics.record_work(started.elapsed().as_nanos() as u64);

            if !report.did_work() && !self.stop.load(Ordering::Acquire) {
                let slept = Instant::now();
                thread::sleep(self.config.poll_interval);
                self.metrics.record_sleep(slept.elapsed().as_nanos() as u64);
            }
        }
        debug!("cleaner worker stopped");
    }

    /// Runs one work iteration. Never sleeps; the worker loop owns
    /// pacing.
    ///
    /// When memory is tight, one in-memory compaction runs, and a disk
    /// pass follows in the same iteration only if the rolling write cost
    /// says compaction has stopped paying for itself. Only when the
    /// memory branch is not taken does backup-disk utilization get a
    /// say.
    pub fn tick(&self) -> WorkReport {
        let memory = self.manager.memory_utilization();

        let mut report = WorkReport::default();
        if memory >= self.config.min_memory_utilization && !self.config.disable_in_memory_cleaning
        {
            let write_cost = self.do_memory_cleaning();
            if write_cost > 0.0 {
                report.compacted = true;
            }
            if self.rolling_write_cost() > self.config.write_cost_threshold {
                report.disk_pass = self.do_disk_cleaning();
            }
        } else if self.manager.disk_utilization() >= self.config.min_disk_utilization {
            report.disk_pass = self.do_disk_cleaning();
        }
        report
    }

    /// Write cost of compaction since the last disk pass.
    fn rolling_write_cost(&self) -> f64 {
        let freed = self.rolling_freed.load(Ordering::Relaxed);
        if freed == 0 {
            return 0.0;
        }
        let relocated = self.rolling_relocated.load(Ordering::Relaxed);
        (relocated + freed) as f64 / freed as f64
    }

    /// Compacts the single best segment in place. Returns the pass's
    /// write cost, or 0.0 if nothing was compacted.
    fn do_memory_cleaning(&self) -> f64 {
        let Some((source, freeable)) = self.manager.segment_to_compact() else {
            return 0.0;
        };

        // Validate the whole source before the first relocation callback
        // can repoint the live directory; a corrupt tail must abort the
        // pass with canonical state untouched.
        if !self.validate_segment(&source) {
            self.manager.quarantine(&source);
            return 0.0;
        }

        let target_seglets = source.seglets().saturating_sub(freeable);
        let Some(target) = self.manager.allocate_compaction_target(&source, target_seglets) else {
            // Survivor reserve drained by concurrent passes; retry later.
            source.unclaim();
            return 0.0;
        };

        let mut relocated = 0u64;
        {
            let reader = source.read();
            let Ok(mut iter) = reader.iter() else {
                // Cleanable segments are immutable; validation just passed.
                unreachable!("validated segment no longer iterates");
            };
            while let Some(entry) = iter.entry() {
                if !entry.entry_type.is_structural() {
                    let location = EntryLocation::new(source.id(), entry.offset);
                    match self.relocate_entry(
                        entry.entry_type,
                        entry.payload,
                        location,
                        Some(&target),
                        &self.metrics.in_memory,
                    ) {
                        Some(bytes) => relocated += u64::from(bytes),
                        // The target is sized from live-byte accounting,
                        // which only shrinks once a segment is cleanable.
                        None => panic!(
                            "compaction target for {} overflowed its live accounting",
                            source.id()
                        ),
                    }
                }
                iter.advance();
            }
        }

        let old_capacity = source.capacity();
        self.manager.seal_survivor(&target);
        let freed = old_capacity.saturating_sub(target.capacity());
        self.manager.swap_compacted(&source, Arc::clone(&target));

        // Every live entry is now resident in the target, so the whole
        // replaced buffer holds no live entries and its seglets go back
        // to the allocator immediately.
        if let Err(err) = self.manager.free_seglets(&source, 0..source.seglets()) {
            warn!(segment = %source.id(), %err, "compacted seglets not released");
        }
        drop(source);
        self.manager.reclaim();

        self.metrics.in_memory.record_pass(1, 0, freed);
        self.rolling_relocated.fetch_add(relocated, Ordering::Relaxed);
        self.rolling_freed.fetch_add(freed, Ordering::Relaxed);

        debug!(segment = %target.id(), relocated, freed, "compaction pass complete");
        if freed == 0 {
            return 0.0;
        }
        (relocated + freed) as f64 / freed as f64
    }

    /// Walks a segment end to end, confirming it terminates at its
    /// footer.
    fn validate_segment(&self, segment: &Arc<LogSegment>) -> bool {
        let reader = segment.read();
        match reader.iter() {
            Err(err) => {
                warn!(segment = %segment.id(), %err, "segment failed validation");
                false
            }
            Ok(mut iter) => {
                while !iter.is_done() {
                    iter.advance();
                }
                if !iter.saw_footer() {
                    warn!(segment = %segment.id(), "segment truncated before its footer");
                }
                iter.saw_footer()
            }
        }
    }

    /// Runs one disk cleaning pass. Returns whether anything was cleaned.
    fn do_disk_cleaning(&self) -> bool {
        let selected = self.segments_to_clean();
        if selected.is_empty() {
            return false;
        }

        let (sources, entries) = self.sorted_live_entries(selected);
        if sources.is_empty() {
            return false;
        }
        let source_bytes: u64 = sources.iter().map(|s| s.capacity()).sum();

        let (survivors, handles, relocated) = self.relocate_live_entries(&sources, &entries);

        // Durable hand-off: sources may only be retired once every
        // survivor holding their entries has replicated.
        for handle in &handles {
            handle.wait();
        }
        self.manager.report_cleaned(&sources, &survivors);

        let survivor_bytes: u64 = survivors.iter().map(|s| s.capacity()).sum();
        let freed = source_bytes.saturating_sub(survivor_bytes);
        self.metrics
            .on_disk
            .record_pass(sources.len() as u64, survivors.len() as u64, freed);
        self.rolling_relocated.store(0, Ordering::Relaxed);
        self.rolling_freed.store(0, Ordering::Relaxed);

        debug!(
            sources = sources.len(),
            survivors = survivors.len(),
            relocated,
            freed,
            "disk cleaning pass complete"
        );

        drop(sources);
        self.manager.reclaim();
        true
    }

    /// Refreshes the shared candidate list and selects this pass's
    /// sources: best cost-benefit first, claimed, bounded by the live
    /// data budget, and capped on utilization.
    fn segments_to_clean(&self) -> Vec<Arc<LogSegment>> {
        let mut candidates = self.candidates.lock();

        let known: HashSet<u64> = candidates.iter().map(|s| s.id().as_u64()).collect();
        for segment in self.manager.cleanable_candidates() {
            if !known.contains(&segment.id().as_u64()) {
                candidates.push(segment);
            }
        }
        candidates.retain(|s| s.state() == SegmentState::Cleanable);
        sort_by_cost_benefit(candidates.as_mut_slice(), wall_time_secs());

        let budget = u64::from(self.config.max_live_segments_per_pass)
            * u64::from(self.manager.geometry().segment_size());
        let mut taken = Vec::new();
        let mut live_total = 0u64;
        let mut index = 0;
        while index < candidates.len() {
            let live = candidates[index].live_bytes();
            if live_total + live > budget {
                break;
            }
            if candidates[index].utilization() > self.config.max_cleanable_utilization
                || !candidates[index].try_claim()
            {
                index += 1;
                continue;
            }
            live_total += live;
            taken.push(candidates.remove(index));
        }
        taken
    }

    /// Extracts potentially-live entries from the sources and sorts them
    /// by age, oldest first. Sources that fail validation are quarantined
    /// and dropped from the pass.
    fn sorted_live_entries(
        &self,
        sources: Vec<Arc<LogSegment>>,
    ) -> (Vec<Arc<LogSegment>>, Vec<LiveEntry>) {
        let mut kept = Vec::with_capacity(sources.len());
        let mut entries = Vec::new();

        for source in sources {
            let mut collected = Vec::new();
            let clean_end = {
                let reader = source.read();
                match reader.iter() {
                    Err(err) => {
                        warn!(segment = %source.id(), %err, "cleaning source failed validation");
                        false
                    }
                    Ok(mut iter) => {
                        let index = kept.len() as u32;
                        while let Some(entry) = iter.entry() {
                            if !entry.entry_type.is_structural() {
                                let location = EntryLocation::new(source.id(), entry.offset);
                                if self.handler.check_liveness(
                                    entry.entry_type,
                                    entry.payload,
                                    location,
                                ) {
                                    collected.push(LiveEntry {
                                        segment: index,
                                        offset: entry.offset,
                                        timestamp: self
                                            .handler
                                            .timestamp(entry.entry_type, entry.payload),
                                        length: entry.length(),
                                    });
                                }
                            }
                            iter.advance();
                        }
                        iter.saw_footer()
                    }
                }
            };

            if clean_end {
                entries.append(&mut collected);
                kept.push(source);
            } else {
                self.manager.quarantine(&source);
            }
        }

        // Stable sort: entries with equal timestamps keep log order.
        entries.sort_by_key(|e| e.timestamp);
        (kept, entries)
    }

    /// Relocates the sorted live entries into survivors, sealing and
    /// allocating as they fill.
    #[allow(clippy::type_complexity)]
    fn relocate_live_entries(
        &self,
        sources: &[Arc<LogSegment>],
        entries: &[LiveEntry],
    ) -> (Vec<Arc<LogSegment>>, Vec<ReplicationHandle>, u64) {
        let readers: Vec<_> = sources.iter().map(|s| s.read()).collect();
        let mut survivors = Vec::new();
        let mut handles = Vec::new();
        let mut survivor: Option<Arc<LogSegment>> = None;
        let mut relocated = 0u64;

        for entry in entries {
            loop {
                let buffer = readers[entry.segment as usize].buffer();
                let header_offset = entry.offset as usize - EntryHeader::SIZE;
                let Some(entry_type) = LogEntryType::from_byte(buffer[header_offset]) else {
                    debug_assert!(false, "validated entry lost its type byte");
                    break;
                };
                let payload =
                    &buffer[entry.offset as usize..(entry.offset + entry.length) as usize];
                let location =
                    EntryLocation::new(sources[entry.segment as usize].id(), entry.offset);

                match self.relocate_entry(
                    entry_type,
                    payload,
                    location,
                    survivor.as_ref(),
                    &self.metrics.on_disk,
                ) {
                    Some(bytes) => {
                        relocated += u64::from(bytes);
                        break;
                    }
                    None => {
                        // Survivor missing or out of space: seal it, get a
                        // fresh one, and retry the same entry.
                        if let Some(full) = survivor.take() {
                            self.close_survivor(full, &mut survivors, &mut handles);
                        }
                        let ticks = self.manager.wait_for_survivors(1);
                        self.metrics.on_disk.record_survivor_wait(ticks);
                        // A parallel worker may win the race for the
                        // reserve; loop back to waiting if so.
                        survivor = self.manager.allocate_survivor();
                    }
                }
            }
        }

        if let Some(last) = survivor.take() {
            self.close_survivor(last, &mut survivors, &mut handles);
        }
        (survivors, handles, relocated)
    }

    /// Seals a filled survivor and starts its replication.
    fn close_survivor(
        &self,
        survivor: Arc<LogSegment>,
        survivors: &mut Vec<Arc<LogSegment>>,
        handles: &mut Vec<ReplicationHandle>,
    ) {
        self.manager.seal_survivor(&survivor);
        handles.push(self.replica_manager.replicate(&survivor));
        survivors.push(survivor);
    }

    /// Invokes the handler for one entry against the current survivor,
    /// charging the given metrics bag. Returns the appended byte count
    /// (zero when the handler declined), or `None` when an append was
    /// attempted but the survivor was missing or full.
    fn relocate_entry(
        &self,
        entry_type: LogEntryType,
        payload: &[u8],
        location: EntryLocation,
        survivor: Option<&Arc<LogSegment>>,
        metrics: &PassMetrics,
    ) -> Option<u32> {
        let mut relocator = EntryRelocator::new(survivor);
        let started = Instant::now();
        self.handler
            .relocate(entry_type, payload, location, &mut relocator);
        metrics.record_callback(started.elapsed().as_nanos() as u64);

        if relocator.failed() {
            return None;
        }
        if relocator.did_append() {
            metrics.record_append(
                u64::from(relocator.appended_bytes()),
                relocator.append_ticks(),
            );
        }
        Some(relocator.appended_bytes())
    }
}

impl std::fmt::Debug for LogCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCleaner")
            .field("num_threads", &self.config.num_threads)
            .field("candidates", &self.candidates.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentGeometry;
    use crate::replica::NullReplicaManager;

    /// Handler for logs whose entries are all dead.
    struct DeclineAll;

    impl EntryHandler for DeclineAll {
        fn timestamp(&self, _entry_type: LogEntryType, _payload: &[u8]) -> u32 {
            0
        }

        fn check_liveness(
            &self,
            _entry_type: LogEntryType,
            _payload: &[u8],
            _location: EntryLocation,
        ) -> bool {
            false
        }

        fn relocate(
            &self,
            _entry_type: LogEntryType,
            _payload: &[u8],
            _location: EntryLocation,
            _relocator: &mut EntryRelocator<'_>,
        ) {
        }
    }

    fn cleaner_over(manager: Arc<SegmentManager>) -> Arc<LogCleaner> {
        let config = CleanerConfig::new()
            .survivor_segments_to_reserve(2)
            .max_live_segments_per_pass(1);
        LogCleaner::new(
            config,
            manager,
            Arc::new(NullReplicaManager::new()),
            Arc::new(DeclineAll),
        )
        .unwrap()
    }

    fn small_manager() -> Arc<SegmentManager> {
        let geometry = SegmentGeometry::new(4096, 256).unwrap();
        Arc::new(SegmentManager::new(geometry, 8 * 16, 64).unwrap())
    }

    #[test]
    fn idle_when_utilization_is_low() {
        let cleaner = cleaner_over(small_manager());
        let report = cleaner.tick();
        assert!(!report.did_work());
    }

    #[test]
    fn disk_pass_frees_fully_dead_segments_without_survivors() {
        let geometry = SegmentGeometry::new(4096, 256).unwrap();
        let manager = Arc::new(SegmentManager::new(geometry, 8 * 16, 2).unwrap());
        let cleaner = cleaner_over(Arc::clone(&manager));

        // Two dead segments against two backup slots.
        for _ in 0..2 {
            for _ in 0..4 {
                manager.append(LogEntryType::Object, &[0u8; 500]).unwrap();
            }
            let segment = manager.close_head().unwrap();
            segment.free(segment.bytes_appended() as u32);
        }

        let report = cleaner.tick();
        assert!(report.disk_pass);

        let snapshot = cleaner.metrics();
        assert_eq!(snapshot.on_disk.survivors_produced, 0);
        assert_eq!(snapshot.on_disk.segments_cleaned, 2);
        assert_eq!(snapshot.on_disk.total_relocation_callbacks, 0);
        assert_eq!(manager.disk_utilization(), 0);
    }

    #[test]
    fn rolling_write_cost_starts_at_zero() {
        let cleaner = cleaner_over(small_manager());
        assert_eq!(cleaner.rolling_write_cost(), 0.0);
    }

    #[test]
    fn work_report_combines_modes() {
        let report = WorkReport {
            compacted: true,
            disk_pass: false,
        };
        assert!(report.did_work());
        assert!(!WorkReport::default().did_work());
    }
}
