use std::sync::Arc;

use tracing::{error, warn};

use crate::buffer::BufferPool;
use crate::common::{Result, TransactionId};

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// Handle for one transaction against a buffer pool.
///
/// `commit` and `abort` consume the handle, so a finished transaction
/// cannot be finished again. A handle dropped while still active is
/// aborted: its dirty pages are restored and its locks released.
pub struct Transaction {
    id: TransactionId,
    pool: Arc<BufferPool>,
    state: TransactionState,
}

impl Transaction {
    pub fn new(id: TransactionId, pool: Arc<BufferPool>) -> Self {
        Self {
            id,
            pool,
            state: TransactionState::Active,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Flushes the pages this transaction dirtied, then releases its locks.
    /// Locks are released even when a flush fails.
    pub fn commit(mut self) -> Result<()> {
        self.finish(true)
    }

    /// Restores the pages this transaction dirtied from disk, then releases
    /// its locks.
    pub fn abort(mut self) -> Result<()> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        self.state = if commit {
            TransactionState::Committed
        } else {
            TransactionState::Aborted
        };
        self.pool.transaction_complete(self.id, commit)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TransactionState::Active {
            return;
        }
        warn!(txn = self.id.as_u64(), "transaction dropped while active, aborting");
        if let Err(e) = self.finish(false) {
            error!(txn = self.id.as_u64(), error = %e, "abort on drop failed");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}
