//! Cross-component invariants: payload identity across cleaning, live
//! byte monotonicity, pool bounds, and no-op behavior on a fully live
//! log.

use std::collections::HashMap;

use emberlog_core::{CleanerConfig, LogEntryType, SegmentGeometry, SegmentManager};
use emberlog_testkit::fixtures::{object_payload, StoreBuilder};
use emberlog_testkit::generators::{workload_strategy, StoreOp};

use proptest::prelude::*;

#[test]
fn cleaning_preserves_every_live_payload() {
    let store = StoreBuilder::new().backup_slots(2).build();

    // Two segments of mixed-size objects; kill half of each.
    for key in 0..24u64 {
        store.put_object(key, 1000 + (key as usize % 7) * 500, key as u32);
        if key == 11 {
            store.close_head();
        }
    }
    store.close_head();
    for key in (0..24u64).step_by(2) {
        store.handler.evict(key);
    }

    let live_before = store.manager.total_live_bytes();
    let pool = store.manager.allocator().total();

    let report = store.tick();
    assert!(report.disk_pass);

    // I1: every live key reads back identical bytes from exactly one
    // surviving location.
    for key in (1..24u64).step_by(2) {
        let expected = object_payload(key, 1000 + (key as usize % 7) * 500);
        assert_eq!(store.handler.read(key).unwrap(), expected);
    }

    // I2: live bytes never grow across a pass.
    assert!(store.manager.total_live_bytes() <= live_before);

    // I5: the seglet pool bound holds.
    assert!(store.manager.allocator().in_use() <= pool);
}

#[test]
fn iteration_is_stable_across_reads() {
    let store = StoreBuilder::new().build();
    for key in 0..10u64 {
        store.put_object(key, 500 + key as usize * 37, key as u32);
    }
    store.close_head();

    let segment = store
        .manager
        .cleanable_candidates()
        .pop()
        .expect("one sealed segment");

    let collect = || {
        let reader = segment.read();
        reader
            .iter()
            .expect("sealed segment iterates")
            .map(|e| (e.entry_type, e.offset))
            .collect::<Vec<_>>()
    };

    // I4: the emitted (type, offset) sequence is identical on every
    // traversal and ends at the footer.
    let first = collect();
    let second = collect();
    assert_eq!(first, second);
    assert_eq!(first.first().unwrap().0, LogEntryType::SegHeader);
    assert_eq!(first.last().unwrap().0, LogEntryType::SegFooter);
    segment.verify().unwrap();
}

#[test]
fn verbatim_rewrite_preserves_the_entry_sequence() {
    let store = StoreBuilder::new().build();
    for key in 0..8u64 {
        store.put_object(key, 300 + key as usize * 11, key as u32);
    }
    store.close_head();
    let sealed = store
        .manager
        .cleanable_candidates()
        .pop()
        .expect("one sealed segment");

    // Write the live entries verbatim into a fresh log of the same
    // geometry, seal it, and compare the (type, payload) sequences.
    let copy_manager =
        SegmentManager::new(store.geometry, store.geometry.seglets_per_segment(), 8).unwrap();
    {
        let reader = sealed.read();
        for entry in reader.iter().unwrap() {
            if !entry.entry_type.is_structural() {
                copy_manager.append(entry.entry_type, entry.payload).unwrap();
            }
        }
    }
    let copy = copy_manager.close_head().unwrap();

    let entries_of = |segment: &emberlog_core::LogSegment| {
        let reader = segment.read();
        reader
            .iter()
            .unwrap()
            .filter(|e| !e.entry_type.is_structural())
            .map(|e| (e.entry_type, e.payload.to_vec()))
            .collect::<Vec<_>>()
    };

    assert_eq!(entries_of(&sealed), entries_of(&copy));
}

#[test]
fn fully_live_log_is_left_alone() {
    let store = StoreBuilder::new().build();
    for key in 0..20u64 {
        store.put_object(key, 2000, key as u32);
    }
    store.close_head();

    let report = store.tick();
    assert!(!report.did_work());
    assert!(store.replicas.submitted().is_empty());

    let metrics = store.cleaner.metrics();
    assert_eq!(metrics.on_disk.survivors_produced, 0);
    assert_eq!(metrics.on_disk.segments_cleaned, 0);
    assert_eq!(metrics.in_memory.segments_cleaned, 0);
}

#[test]
fn geometry_rejects_partial_seglets() {
    assert!(SegmentGeometry::new(64 * 1024, 4096).is_ok());
    assert!(SegmentGeometry::new(64 * 1024, 4000).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Random workloads: after closing the head and running the cleaner,
    /// every key the directory considers live reads back exactly what
    /// the model expects, and the seglet pool bound holds throughout.
    #[test]
    fn random_workloads_preserve_live_data(ops in workload_strategy(120)) {
        let store = StoreBuilder::new()
            .pool_segments(24)
            .backup_slots(4)
            .config(CleanerConfig::default())
            .build();
        let mut model: HashMap<u64, usize> = HashMap::new();
        let mut timestamp = 1u32;

        for op in ops {
            timestamp += 1;
            match op {
                StoreOp::Put { key, data_len } => {
                    store.put_object(key, data_len, timestamp);
                    model.insert(key, data_len);
                }
                StoreOp::Delete { key } => {
                    store.handler.delete(key, timestamp).unwrap();
                    model.remove(&key);
                }
                StoreOp::Evict { key } => {
                    store.handler.evict(key);
                    model.remove(&key);
                }
            }
        }
        store.close_head();

        store.tick();
        store.tick();

        let allocator = store.manager.allocator();
        prop_assert!(allocator.in_use() <= allocator.total());

        for (key, data_len) in &model {
            prop_assert!(store.handler.contains(*key));
            prop_assert_eq!(
                store.handler.read(*key).expect("live key is readable"),
                object_payload(*key, *data_len)
            );
        }
    }
}
