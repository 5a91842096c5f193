use std::time::Duration;

use super::error::{DbError, Result};

/// Default size of a page in bytes (4 KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default buffer pool capacity in pages
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 50;

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default upper bound on how long a transaction waits for a page lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Process-wide storage settings, fixed when the buffer pool is built.
///
/// Changing `page_size` after pages exist on disk invalidates their layout,
/// so it only makes sense when setting up fresh files (tests, demos).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Bytes per page, header included
    pub page_size: usize,
    /// Maximum number of pages cached by the buffer pool
    pub pool_size: usize,
    /// K for the LRU-K eviction order
    pub lru_k: usize,
    /// Maximum time `get_page` waits for a conflicting lock
    pub lock_timeout: Duration,
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_lru_k(mut self, k: usize) -> Self {
        self.lru_k = k;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(DbError::InvalidConfig("page size must be non-zero".into()));
        }
        if self.pool_size == 0 {
            return Err(DbError::InvalidConfig("pool size must be non-zero".into()));
        }
        if self.lru_k == 0 {
            return Err(DbError::InvalidConfig("LRU-K k must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_size: DEFAULT_BUFFER_POOL_SIZE,
            lru_k: DEFAULT_LRUK_K,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}
