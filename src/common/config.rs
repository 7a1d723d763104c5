use std::time::Duration;

/// Buffer pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool
    pub pool_size: usize,
    /// K for the LRU-K replacement policy (must be > 1)
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer_k: 2,
        }
    }
}

/// How often the deadlock detector rebuilds the waits-for graph.
pub const DEADLOCK_DETECTION_INTERVAL: Duration = Duration::from_millis(50);
