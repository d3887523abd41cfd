use std::time::Duration;

/// Tunables for the storage and concurrency core.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Buffer pool capacity in frames.
    pub pool_size: usize,
    /// K for the LRU-K replacement policy.
    pub replacer_k: usize,
    /// Maximum number of (key, RID) pairs a leaf may reach before splitting.
    pub leaf_max_size: usize,
    /// Maximum number of children of an internal node.
    pub internal_max_size: usize,
    /// How often the deadlock detector wakes up.
    pub cycle_detection_interval: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer_k: 2,
            leaf_max_size: 32,
            internal_max_size: 32,
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}
