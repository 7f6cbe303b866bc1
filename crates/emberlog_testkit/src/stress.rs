//! Stress utilities: randomized writer workloads racing the cleaner.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::fixtures::{object_payload, TestStore};

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Writer threads to spawn.
    pub writers: usize,
    /// Operations per writer.
    pub operations: usize,
    /// Key space; small enough that overwrites and deletes are common.
    pub key_space: u64,
    /// Largest object data size in bytes.
    pub max_data_len: usize,
    /// RNG seed so failures reproduce.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 2,
            operations: 500,
            key_space: 128,
            max_data_len: 1024,
            seed: 0x5EED,
        }
    }
}

/// Result of a stress run.
#[derive(Debug)]
pub struct StressResult {
    /// Operations that completed.
    pub successful: usize,
    /// Operations the engine rejected (e.g. pool pressure).
    pub failed: usize,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// Runs randomized put/delete traffic from several writer threads while
/// the store's cleaner is (optionally already) running.
///
/// Returns after all writers finish; the caller owns starting and
/// stopping the cleaner around this.
pub fn stress_writers(store: &Arc<TestStore>, config: &StressConfig) -> StressResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let handles: Vec<_> = (0..config.writers)
        .map(|writer| {
            let store = Arc::clone(store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(config.seed ^ writer as u64);
                for op in 0..config.operations {
                    let key = rng.gen_range(0..config.key_space);
                    let timestamp = (writer * config.operations + op) as u32;

                    let outcome = if rng.gen_bool(0.8) {
                        let data_len = rng.gen_range(16..=config.max_data_len);
                        store
                            .handler
                            .put(key, &object_payload(key, data_len), timestamp)
                            .map(|_| ())
                    } else {
                        store.handler.delete(key, timestamp)
                    };

                    match outcome {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread panicked");
    }

    StressResult {
        successful: successful.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    }
}
