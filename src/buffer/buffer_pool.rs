use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::common::{
    DbError, PageId, Permissions, RecordId, Result, StorageConfig, TableId, TransactionId,
};
use crate::concurrency::LockManager;
use crate::storage::page::HeapPage;
use crate::tuple::Tuple;

use super::LruKReplacer;

/// Shared handle to a cached page. The `RwLock` guards the page's memory;
/// which transaction may read or modify it is decided by the lock manager.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// Cache contents, guarded by one mutex
struct BufferPoolState {
    /// Cached pages, at most pool_size of them
    pages: HashMap<PageId, PageRef>,
    /// Eviction order over the cached pages
    replacer: LruKReplacer,
}

/// BufferPool caches decoded heap pages and mediates every page access.
///
/// Each `get_page` first takes a page lock for the transaction, then serves
/// the page from the cache or loads it through the table's heap file,
/// evicting a clean page when the cache is full. Dirty pages stay cached
/// until their transaction commits (they are written back) or aborts (they
/// are restored from disk).
///
/// The pool mutex is never held while waiting for a page lock. Page
/// contents are locked only after the pool mutex has been released, except
/// for the non-blocking `try_read` used to check evictability.
pub struct BufferPool {
    /// Maximum number of cached pages
    pool_size: usize,
    lock_timeout: Duration,
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    state: Mutex<BufferPoolState>,
}

impl BufferPool {
    /// Creates an empty buffer pool sized by `config`.
    pub fn new(config: &StorageConfig, catalog: Arc<Catalog>) -> Self {
        Self {
            pool_size: config.pool_size,
            lock_timeout: config.lock_timeout,
            catalog,
            lock_manager: LockManager::new(),
            state: Mutex::new(BufferPoolState {
                pages: HashMap::with_capacity(config.pool_size),
                replacer: LruKReplacer::new(config.lru_k),
            }),
        }
    }

    /// Fetches a page on behalf of `tid`, locking it shared for `ReadOnly`
    /// and exclusive for `ReadWrite`.
    ///
    /// Blocks while another transaction holds a conflicting lock. Fails with
    /// [`DbError::TransactionAborted`] on deadlock or when the lock wait
    /// times out, and with [`DbError::AllPagesDirty`] when the page has to
    /// be loaded but no cached page can be evicted.
    ///
    /// The lock is taken before the page is read, so it stays held until
    /// the transaction ends even when loading fails (for example with
    /// [`DbError::CorruptOrMissingPage`] past the end of the file).
    pub fn get_page(&self, tid: TransactionId, page_id: PageId, perm: Permissions) -> Result<PageRef> {
        self.lock_manager
            .acquire(tid, page_id, perm.into(), self.lock_timeout)?;

        let mut state = self.state.lock();
        if let Some(page) = state.pages.get(&page_id).cloned() {
            state.replacer.record_access(page_id);
            return Ok(page);
        }

        if state.pages.len() >= self.pool_size {
            self.evict_locked(&mut state)?;
        }

        let file = self.catalog.file(page_id.table_id())?;
        let page = Arc::new(RwLock::new(file.read_page(page_id)?));
        debug!(txn = tid.as_u64(), page = %page_id, "loaded page");

        state.pages.insert(page_id, Arc::clone(&page));
        state.replacer.record_access(page_id);
        Ok(page)
    }

    /// Adds the tuple to the table on behalf of `tid` and returns its
    /// record id. The modified page is marked dirty and kept cached.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: TableId, tuple: Tuple) -> Result<RecordId> {
        let file = self.catalog.file(table_id)?;
        let (record_id, pages) = file.insert_tuple(self, tid, tuple)?;
        self.mark_dirty_and_cache(tid, pages)?;
        Ok(record_id)
    }

    /// Removes the tuple, located by its record id, on behalf of `tid`.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| DbError::invalid_delete(None, "tuple has no record id"))?;
        let file = self.catalog.file(rid.page_id.table_id())?;
        let pages = file.delete_tuple(self, tid, tuple)?;
        self.mark_dirty_and_cache(tid, pages)
    }

    /// Ends the transaction. On commit its dirty pages are written to disk;
    /// on abort they are replaced by their on-disk contents. A page that
    /// cannot be written at commit is reverted to its on-disk contents (or
    /// dropped from the cache), so no page stays dirty on behalf of a
    /// finished transaction. Its locks are released in either case, after
    /// which the first error (if any) is returned.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let dirtied = self.pages_dirtied_by(tid);
        let page_count = dirtied.len();

        let result = dirtied
            .iter()
            .map(|page| {
                if commit {
                    self.commit_page(page)
                } else {
                    self.restore_page(page)
                }
            })
            .fold(Ok(()), |acc, r| acc.and(r));

        let locks = self.lock_manager.release_all(tid);
        info!(
            txn = tid.as_u64(),
            commit,
            dirty_pages = page_count,
            locks,
            ok = result.is_ok(),
            "transaction complete"
        );
        result
    }

    /// Writes the page back to disk if it is cached and dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let page = self.state.lock().pages.get(&page_id).cloned();
        match page {
            Some(page) => self.flush_page_ref(&page),
            None => Ok(()),
        }
    }

    /// Writes back every cached page dirtied by `tid`, without releasing
    /// any locks.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        self.pages_dirtied_by(tid)
            .iter()
            .try_for_each(|page| self.flush_page_ref(page))
    }

    /// Writes back every dirty cached page.
    ///
    /// Breaks the isolation of running transactions; meant for shutdown and
    /// tests only.
    pub fn flush_all_pages(&self) -> Result<()> {
        let pages: Vec<PageRef> = self.state.lock().pages.values().cloned().collect();
        pages.iter().try_for_each(|page| self.flush_page_ref(page))
    }

    /// Drops the page from the cache without writing it back.
    pub fn discard_page(&self, page_id: PageId) {
        let mut state = self.state.lock();
        if state.pages.remove(&page_id).is_some() {
            state.replacer.remove(page_id);
            debug!(page = %page_id, "discarded page");
        }
    }

    /// Evicts one clean page chosen by the LRU-K order.
    ///
    /// Returns `Ok(None)` if the cache is empty and
    /// [`DbError::AllPagesDirty`] (leaving the cache unchanged) if every
    /// cached page is dirty.
    pub fn evict_page(&self) -> Result<Option<PageId>> {
        let mut state = self.state.lock();
        if state.pages.is_empty() {
            return Ok(None);
        }
        self.evict_locked(&mut state).map(Some)
    }

    /// Releases the transaction's lock on one page before the transaction
    /// ends. Only safe for pages it has not modified.
    pub fn release_page(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.release(tid, page_id)
    }

    /// Returns true if the transaction holds any lock on the page.
    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds_lock(tid, page_id)
    }

    /// Returns the number of cached pages.
    pub fn cached_page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        self.state.lock().pages.contains_key(&page_id)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Picks and removes a clean victim. Evictability is refreshed from
    /// each page's dirty marker first; a page whose contents are being
    /// written right now is treated as dirty.
    fn evict_locked(&self, state: &mut BufferPoolState) -> Result<PageId> {
        let BufferPoolState { pages, replacer } = state;
        for (&page_id, page) in pages.iter() {
            let evictable = page
                .try_read()
                .is_some_and(|page| page.is_dirty().is_none());
            replacer.set_evictable(page_id, evictable);
        }

        let victim = replacer.evict().ok_or(DbError::AllPagesDirty)?;
        pages.remove(&victim);
        debug!(page = %victim, "evicted page");
        Ok(victim)
    }

    /// Marks pages returned by a heap file operation dirty on behalf of
    /// `tid` and makes sure each is the cached copy. A page that was
    /// evicted between being fetched and being marked is put back.
    fn mark_dirty_and_cache(&self, tid: TransactionId, pages: Vec<PageRef>) -> Result<()> {
        for page in pages {
            let page_id = {
                let mut guard = page.write();
                guard.set_dirty(Some(tid));
                guard.page_id()
            };

            let mut state = self.state.lock();
            let cached = state
                .pages
                .get(&page_id)
                .is_some_and(|existing| Arc::ptr_eq(existing, &page));
            if !cached {
                if !state.pages.contains_key(&page_id) && state.pages.len() >= self.pool_size {
                    self.evict_locked(&mut state)?;
                }
                state.pages.insert(page_id, page);
            }
            state.replacer.record_access(page_id);
            state.replacer.set_evictable(page_id, false);
        }
        Ok(())
    }

    fn pages_dirtied_by(&self, tid: TransactionId) -> Vec<PageRef> {
        let pages: Vec<PageRef> = self.state.lock().pages.values().cloned().collect();
        pages
            .into_iter()
            .filter(|page| page.read().is_dirty() == Some(tid))
            .collect()
    }

    /// Writes a dirty page through its heap file, marks it clean and makes
    /// the written contents its new before-image.
    fn flush_page_ref(&self, page: &PageRef) -> Result<()> {
        let mut guard = page.write();
        let Some(tid) = guard.is_dirty() else {
            return Ok(());
        };

        let page_id = guard.page_id();
        let file = self.catalog.file(page_id.table_id())?;
        file.write_page(&guard)?;
        guard.set_dirty(None);
        guard.set_before_image()?;

        debug!(txn = tid.as_u64(), page = %page_id, "flushed page");
        Ok(())
    }

    /// Flushes one page at commit. If the write fails the page is reverted
    /// so it is not left dirty once the transaction's locks are gone.
    fn commit_page(&self, page: &PageRef) -> Result<()> {
        let Err(e) = self.flush_page_ref(page) else {
            return Ok(());
        };
        let page_id = page.read().page_id();
        warn!(page = %page_id, error = %e, "write-back failed at commit, reverting page");
        // the write error is the one reported; restore_page logs its own
        let _ = self.restore_page(page);
        Err(e)
    }

    /// Replaces a dirty page's contents with the version on disk. If the
    /// page cannot be re-read it is dropped from the cache instead, so the
    /// modified copy is never served again.
    fn restore_page(&self, page: &PageRef) -> Result<()> {
        let mut guard = page.write();
        let page_id = guard.page_id();

        let fresh = self
            .catalog
            .file(page_id.table_id())
            .and_then(|file| file.read_page(page_id));

        match fresh {
            Ok(fresh) => {
                *guard = fresh;
                debug!(page = %page_id, "restored page from disk");
                Ok(())
            }
            Err(e) => {
                drop(guard);
                warn!(page = %page_id, error = %e, "failed to restore page, discarding it");
                self.discard_page(page_id);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{DataType, Schema, TupleBuilder};
    use tempfile::{tempdir, TempDir};

    fn setup(pool_size: usize) -> (TempDir, Arc<Catalog>, BufferPool, TableId) {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::new());
        let schema = Schema::builder().column("id", DataType::Integer).build_arc();
        let table = catalog
            .create_table("t", dir.path().join("t.dat"), schema, 4096)
            .unwrap();
        let config = StorageConfig::new()
            .with_pool_size(pool_size)
            .with_lock_timeout(Duration::from_millis(50));
        let pool = BufferPool::new(&config, Arc::clone(&catalog));
        (dir, catalog, pool, table)
    }

    fn int_tuple(catalog: &Catalog, table: TableId, v: i32) -> Tuple {
        TupleBuilder::new(catalog.schema(table).unwrap())
            .value(v)
            .build()
            .unwrap()
    }

    #[test]
    fn test_get_page_caches_and_locks() {
        let (_dir, catalog, pool, table) = setup(4);
        let pid = catalog.file(table).unwrap().append_empty_page().unwrap();
        let tid = TransactionId::new(1);

        let a = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
        let b = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(pool.is_cached(pid));
        assert!(pool.holds_lock(tid, pid));
        assert_eq!(pool.cached_page_count(), 1);
    }

    #[test]
    fn test_insert_marks_dirty() {
        let (_dir, catalog, pool, table) = setup(4);
        let tid = TransactionId::new(1);

        let rid = pool.insert_tuple(tid, table, int_tuple(&catalog, table, 3)).unwrap();
        let page = pool.get_page(tid, rid.page_id, Permissions::ReadOnly).unwrap();
        assert_eq!(page.read().is_dirty(), Some(tid));
    }

    #[test]
    fn test_evict_page_skips_dirty() {
        let (_dir, catalog, pool, table) = setup(4);
        let tid = TransactionId::new(1);
        pool.insert_tuple(tid, table, int_tuple(&catalog, table, 1)).unwrap();

        assert!(matches!(pool.evict_page(), Err(DbError::AllPagesDirty)));
        assert_eq!(pool.cached_page_count(), 1);

        pool.transaction_complete(tid, true).unwrap();
        assert_eq!(pool.evict_page().unwrap(), Some(PageId::new(table, 0)));
        assert_eq!(pool.evict_page().unwrap(), None);
    }

    #[test]
    fn test_discard_drops_changes() {
        let (_dir, catalog, pool, table) = setup(4);
        let tid = TransactionId::new(1);
        let rid = pool.insert_tuple(tid, table, int_tuple(&catalog, table, 1)).unwrap();

        pool.discard_page(rid.page_id);
        assert!(!pool.is_cached(rid.page_id));

        let page = pool.get_page(tid, rid.page_id, Permissions::ReadOnly).unwrap();
        assert_eq!(page.read().tuples().count(), 0);
    }

    #[test]
    fn test_flush_pages_keeps_locks() {
        let (_dir, catalog, pool, table) = setup(4);
        let tid = TransactionId::new(1);
        let rid = pool.insert_tuple(tid, table, int_tuple(&catalog, table, 1)).unwrap();

        pool.flush_pages(tid).unwrap();
        assert!(pool.holds_lock(tid, rid.page_id));

        let on_disk = catalog.file(table).unwrap().read_page(rid.page_id).unwrap();
        assert_eq!(on_disk.tuples().count(), 1);
    }

    #[test]
    fn test_commit_with_failed_write_leaves_nothing_dirty() {
        let (_dir, catalog, pool, table) = setup(8);
        let tid = TransactionId::new(1);
        let good = pool.insert_tuple(tid, table, int_tuple(&catalog, table, 1)).unwrap();

        // a dirty page past the end of the file cannot be written back
        let bad_id = PageId::new(table, 5);
        let mut bad = HeapPage::new(
            bad_id,
            catalog.schema(table).unwrap(),
            &HeapPage::empty_page_data(4096),
        )
        .unwrap();
        bad.insert_tuple(int_tuple(&catalog, table, 2)).unwrap();
        bad.set_dirty(Some(tid));
        pool.state.lock().pages.insert(bad_id, Arc::new(RwLock::new(bad)));

        let err = pool.transaction_complete(tid, true).unwrap_err();
        assert!(matches!(err, DbError::PageOutOfRange { page_id, .. } if page_id == bad_id));

        // every other page was still written, and nothing is left dirty
        let on_disk = catalog.file(table).unwrap().read_page(good.page_id).unwrap();
        assert_eq!(on_disk.tuples().count(), 1);
        assert!(!pool.is_cached(bad_id));
        assert!(pool.pages_dirtied_by(tid).is_empty());
        assert!(!pool.holds_lock(tid, good.page_id));
        assert_eq!(pool.evict_page().unwrap(), Some(good.page_id));
    }

    #[test]
    fn test_flush_page_clears_dirty_marker() {
        let (_dir, catalog, pool, table) = setup(4);
        let tid = TransactionId::new(1);
        let rid = pool.insert_tuple(tid, table, int_tuple(&catalog, table, 9)).unwrap();

        pool.flush_page(rid.page_id).unwrap();

        let page = pool.get_page(tid, rid.page_id, Permissions::ReadOnly).unwrap();
        let guard = page.read();
        assert_eq!(guard.is_dirty(), None);
        let on_disk = catalog.file(table).unwrap().read_page(rid.page_id).unwrap();
        assert_eq!(on_disk.serialize().unwrap(), guard.serialize().unwrap());
        assert!(pool.holds_lock(tid, rid.page_id));
    }
}
