use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::common::{AbortReason, DbError, PageId, Permissions, Result, TransactionId};

use super::WaitForGraph;

/// Page lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl From<Permissions> for LockMode {
    fn from(perm: Permissions) -> Self {
        match perm {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Result of a single, non-blocking lock request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Granted,
    /// Rejected because these transactions hold conflicting locks
    Blocked(Vec<TransactionId>),
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockOutcome::Granted)
    }
}

/// Lock state guarded by the manager's mutex
#[derive(Default)]
struct LockTable {
    /// Holders per page: either any number of Shared or a single Exclusive
    page_locks: HashMap<PageId, HashMap<TransactionId, LockMode>>,
    /// Pages locked per transaction, for release_all
    txn_pages: HashMap<TransactionId, HashSet<PageId>>,
    wait_for: WaitForGraph,
}

impl LockTable {
    fn try_grant(&mut self, tid: TransactionId, page_id: PageId, mode: LockMode) -> LockOutcome {
        let holders = self.page_locks.entry(page_id).or_default();

        // Already held at the same or a stronger mode
        match (holders.get(&tid), mode) {
            (Some(LockMode::Exclusive), _) | (Some(LockMode::Shared), LockMode::Shared) => {
                return LockOutcome::Granted;
            }
            _ => {}
        }

        // An exclusive request (fresh or upgrade) conflicts with every other
        // holder; a shared request only with an exclusive holder.
        let conflicts: Vec<TransactionId> = holders
            .iter()
            .filter(|&(&other, &held)| {
                other != tid && (mode == LockMode::Exclusive || held == LockMode::Exclusive)
            })
            .map(|(&other, _)| other)
            .collect();

        if !conflicts.is_empty() {
            return LockOutcome::Blocked(conflicts);
        }

        holders.insert(tid, mode);
        self.txn_pages.entry(tid).or_default().insert(page_id);
        LockOutcome::Granted
    }

    fn release(&mut self, tid: TransactionId, page_id: PageId) -> bool {
        let Some(holders) = self.page_locks.get_mut(&page_id) else {
            return false;
        };
        let released = holders.remove(&tid).is_some();
        if holders.is_empty() {
            self.page_locks.remove(&page_id);
        }
        if let Some(pages) = self.txn_pages.get_mut(&tid) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.txn_pages.remove(&tid);
            }
        }
        released
    }
}

/// Page-level two-phase lock manager.
///
/// `try_acquire` answers immediately. `acquire` waits on a condition
/// variable that is signalled whenever a lock is released, and gives up
/// with [`DbError::TransactionAborted`] when:
///
/// - waiting would close a cycle in the wait-for graph (the requester is
///   the victim), or
/// - the lock is still unavailable at the deadline.
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
        }
    }

    /// Makes a single attempt to lock the page; never blocks on other
    /// transactions.
    pub fn try_acquire(&self, tid: TransactionId, page_id: PageId, mode: LockMode) -> LockOutcome {
        self.table.lock().try_grant(tid, page_id, mode)
    }

    /// Locks the page, waiting up to `timeout` for conflicting holders to
    /// release it.
    pub fn acquire(
        &self,
        tid: TransactionId,
        page_id: PageId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut table = self.table.lock();

        loop {
            match table.try_grant(tid, page_id, mode) {
                LockOutcome::Granted => {
                    table.wait_for.clear_waits(tid);
                    debug!(txn = tid.as_u64(), page = %page_id, ?mode, "lock granted");
                    return Ok(());
                }
                LockOutcome::Blocked(holders) => {
                    table.wait_for.set_waits(tid, holders);

                    if let Some(cycle) = table.wait_for.find_cycle(tid) {
                        table.wait_for.clear_waits(tid);
                        warn!(
                            txn = tid.as_u64(),
                            page = %page_id,
                            ?mode,
                            cycle = ?cycle,
                            "deadlock detected, aborting requester"
                        );
                        return Err(DbError::TransactionAborted {
                            tid,
                            reason: AbortReason::Deadlock,
                        });
                    }

                    if Instant::now() >= deadline {
                        table.wait_for.clear_waits(tid);
                        warn!(
                            txn = tid.as_u64(),
                            page = %page_id,
                            ?mode,
                            timeout_ms = timeout.as_millis() as u64,
                            "lock wait timed out"
                        );
                        return Err(DbError::TransactionAborted {
                            tid,
                            reason: AbortReason::LockTimeout,
                        });
                    }

                    self.released.wait_until(&mut table, deadline);
                }
            }
        }
    }

    /// Releases the transaction's lock on one page.
    /// Returns false if it held none.
    pub fn release(&self, tid: TransactionId, page_id: PageId) -> bool {
        let released = self.table.lock().release(tid, page_id);
        if released {
            self.released.notify_all();
        }
        released
    }

    /// Releases every lock held by the transaction and drops it from the
    /// wait-for graph. Returns the number of locks released.
    pub fn release_all(&self, tid: TransactionId) -> usize {
        let mut table = self.table.lock();
        let pages: Vec<PageId> = table
            .txn_pages
            .get(&tid)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();

        let count = pages
            .into_iter()
            .filter(|&page_id| table.release(tid, page_id))
            .count();
        table.txn_pages.remove(&tid);
        table.wait_for.remove_transaction(tid);
        drop(table);

        self.released.notify_all();
        count
    }

    /// Returns true if the transaction holds any lock on the page.
    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_mode(tid, page_id).is_some()
    }

    /// Returns the mode in which the transaction holds the page.
    pub fn lock_mode(&self, tid: TransactionId, page_id: PageId) -> Option<LockMode> {
        self.table
            .lock()
            .page_locks
            .get(&page_id)
            .and_then(|holders| holders.get(&tid).copied())
    }

    /// Returns every holder of the page and its mode.
    pub fn holders(&self, page_id: PageId) -> Vec<(TransactionId, LockMode)> {
        self.table
            .lock()
            .page_locks
            .get(&page_id)
            .map(|holders| holders.iter().map(|(&t, &m)| (t, m)).collect())
            .unwrap_or_default()
    }

    /// Returns the pages the transaction currently holds locks on.
    pub fn locked_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.table
            .lock()
            .txn_pages
            .get(&tid)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the transactions `tid` is currently waiting on.
    pub fn waits_for(&self, tid: TransactionId) -> Vec<TransactionId> {
        self.table.lock().wait_for.waits_for(tid)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
