//! Randomized writer traffic racing the cleaner's worker threads.

use std::sync::Arc;
use std::time::Duration;

use emberlog_core::CleanerConfig;
use emberlog_testkit::fixtures::{object_payload, StoreBuilder};
use emberlog_testkit::stress::{stress_writers, StressConfig};

#[test]
fn writers_and_cleaner_race_without_losing_data() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store = Arc::new(
        StoreBuilder::new()
            .pool_segments(32)
            .backup_slots(8)
            .config(
                CleanerConfig::new()
                    .survivor_segments_to_reserve(4)
                    .max_live_segments_per_pass(3)
                    .min_disk_utilization(50)
                    .poll_interval(Duration::from_millis(1)),
            )
            .build(),
    );

    store.cleaner.start();
    let result = stress_writers(
        &store,
        &StressConfig {
            writers: 3,
            operations: 400,
            ..StressConfig::default()
        },
    );
    // Rotate the last writes into cleanable territory and let the
    // cleaner settle before stopping it.
    store.close_head();
    std::thread::sleep(Duration::from_millis(50));
    store.cleaner.stop();

    assert!(result.successful > 0);
    assert_eq!(result.failed, 0);

    // The pool bound held and every key the directory still considers
    // live reads back intact data of a size some writer actually wrote.
    let allocator = store.manager.allocator();
    assert!(allocator.in_use() <= allocator.total());

    for key in store.handler.live_keys() {
        let data = store.handler.read(key).expect("live key is readable");
        assert!(!data.is_empty());
        assert_eq!(data, object_payload(key, data.len()));
    }
}
