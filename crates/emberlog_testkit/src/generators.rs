//! Property-based test generators.

use proptest::prelude::*;

/// A randomized store operation.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Write (or overwrite) a key with `data_len` bytes.
    Put {
        /// Key to write.
        key: u64,
        /// Data size in bytes.
        data_len: usize,
    },
    /// Delete a key, appending a tombstone.
    Delete {
        /// Key to delete.
        key: u64,
    },
    /// Drop a key from the directory without a tombstone.
    Evict {
        /// Key to evict.
        key: u64,
    },
}

/// Strategy over a small key space so overwrites and deletes are common.
pub fn key_strategy() -> impl Strategy<Value = u64> {
    0u64..64
}

/// Strategy over payload sizes that keeps several entries per segment.
pub fn data_len_strategy() -> impl Strategy<Value = usize> {
    16usize..2048
}

/// Strategy over single store operations, biased toward writes.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        4 => (key_strategy(), data_len_strategy())
            .prop_map(|(key, data_len)| StoreOp::Put { key, data_len }),
        1 => key_strategy().prop_map(|key| StoreOp::Delete { key }),
        1 => key_strategy().prop_map(|key| StoreOp::Evict { key }),
    ]
}

/// Strategy over operation sequences.
pub fn workload_strategy(max_ops: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op_strategy(), 1..max_ops)
}
