//! Record store configuration.

use serde::{Deserialize, Serialize};

/// Record store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Record slots allocated per arena chunk
    pub records_per_chunk: usize,
    /// Initial bucket capacity of new hash indices
    pub hash_initial_buckets: usize,
    /// Ordered index resorts fully once pending reinsertions times this ratio reach its length
    pub ordered_full_resort_ratio: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            records_per_chunk: 256,
            hash_initial_buckets: 32,
            ordered_full_resort_ratio: 8, // binary insertion below 1/8 of the index
        }
    }
}
