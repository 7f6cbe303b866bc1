//! Ready-made engine assemblies for tests.

use std::sync::Arc;

use emberlog_core::{
    CleanerConfig, EntryLocation, LogCleaner, SegmentGeometry, SegmentManager, WorkReport,
};

use crate::directory::DirectoryHandler;
use crate::replica::StubReplicaManager;

/// Builder for a [`TestStore`].
///
/// Defaults: 64 KiB segments of 4 KiB seglets, a pool of 16 segments
/// plus the survivor reserve, 64 backup slots, and a small per-pass
/// budget with a matching survivor reserve so tiny pools stay mostly
/// usable.
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    geometry: SegmentGeometry,
    pool_segments: u32,
    backup_slots: u32,
    config: CleanerConfig,
}

/// Cleaner configuration shrunk for test-sized pools.
#[must_use]
pub fn small_pass_config() -> CleanerConfig {
    CleanerConfig::new()
        .survivor_segments_to_reserve(2)
        .max_live_segments_per_pass(1)
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self {
            geometry: SegmentGeometry::new(64 * 1024, 4096).expect("default geometry is valid"),
            pool_segments: 16,
            backup_slots: 64,
            config: small_pass_config(),
        }
    }
}

impl StoreBuilder {
    /// Creates a builder with the defaults above.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment geometry.
    #[must_use]
    pub fn geometry(mut self, segment_size: u32, seglet_size: u32) -> Self {
        self.geometry =
            SegmentGeometry::new(segment_size, seglet_size).expect("test geometry is valid");
        self
    }

    /// Sets the seglet pool size in full segments, excluding the
    /// survivor reserve (which is added on top).
    #[must_use]
    pub fn pool_segments(mut self, segments: u32) -> Self {
        self.pool_segments = segments;
        self
    }

    /// Sets the backup disk budget in segments.
    #[must_use]
    pub fn backup_slots(mut self, slots: u32) -> Self {
        self.backup_slots = slots;
        self
    }

    /// Replaces the cleaner configuration.
    #[must_use]
    pub fn config(mut self, config: CleanerConfig) -> Self {
        self.config = config;
        self
    }

    /// Assembles the store.
    #[must_use]
    pub fn build(self) -> TestStore {
        let reserve_segments =
            self.config.survivor_segments_to_reserve * self.config.num_threads as u32;
        let total_seglets =
            (self.pool_segments + reserve_segments) * self.geometry.seglets_per_segment();

        let manager = Arc::new(
            SegmentManager::new(self.geometry, total_seglets, self.backup_slots)
                .expect("test manager configuration is valid"),
        );
        let handler = Arc::new(DirectoryHandler::new(Arc::clone(&manager)));
        let replicas = Arc::new(StubReplicaManager::new());
        let replica_manager: Arc<dyn emberlog_core::ReplicaManager> =
            Arc::clone(&replicas) as Arc<dyn emberlog_core::ReplicaManager>;
        let entry_handler: Arc<dyn emberlog_core::EntryHandler> =
            Arc::clone(&handler) as Arc<dyn emberlog_core::EntryHandler>;
        let cleaner = LogCleaner::new(
            self.config,
            Arc::clone(&manager),
            replica_manager,
            entry_handler,
        )
        .expect("test cleaner configuration is valid");

        TestStore {
            geometry: self.geometry,
            manager,
            handler,
            replicas,
            cleaner,
        }
    }
}

/// A fully wired engine: manager, directory handler, stub replicas, and
/// cleaner.
pub struct TestStore {
    /// Segment geometry in use.
    pub geometry: SegmentGeometry,
    /// The segment manager under test.
    pub manager: Arc<SegmentManager>,
    /// Live directory / entry handler.
    pub handler: Arc<DirectoryHandler>,
    /// Controllable replica manager.
    pub replicas: Arc<StubReplicaManager>,
    /// The cleaner under test.
    pub cleaner: Arc<LogCleaner>,
}

impl TestStore {
    /// Builds a store with default settings.
    #[must_use]
    pub fn with_defaults() -> Self {
        StoreBuilder::new().build()
    }

    /// Writes an object with deterministic data derived from its key.
    pub fn put_object(&self, key: u64, data_len: usize, timestamp: u32) -> EntryLocation {
        let data = object_payload(key, data_len);
        self.handler
            .put(key, &data, timestamp)
            .expect("test put succeeds")
    }

    /// Runs one cleaner iteration.
    pub fn tick(&self) -> WorkReport {
        self.cleaner.tick()
    }

    /// Closes the open head segment so its contents become cleanable.
    pub fn close_head(&self) {
        self.manager.close_head();
    }
}

/// Deterministic object data for a key.
#[must_use]
pub fn object_payload(key: u64, data_len: usize) -> Vec<u8> {
    let mut data = vec![0u8; data_len];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (key as usize).wrapping_add(i) as u8;
    }
    data
}
