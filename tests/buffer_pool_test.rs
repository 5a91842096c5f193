//! Integration tests for the buffer pool

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use heapstore::buffer::BufferPool;
use heapstore::catalog::Catalog;
use heapstore::common::{
    AbortReason, DbError, PageId, Permissions, StorageConfig, TableId, TransactionId,
};
use heapstore::tuple::{DataType, Schema, Tuple, TupleBuilder};
use tempfile::{tempdir, TempDir};

fn int_schema() -> Arc<Schema> {
    Schema::builder()
        .column("id", DataType::Integer)
        .column("v", DataType::BigInt)
        .build_arc()
}

fn create_pool(pool_size: usize) -> (Arc<BufferPool>, Arc<Catalog>, TableId, TempDir) {
    let dir = tempdir().unwrap();
    let catalog = Arc::new(Catalog::new());
    let table = catalog
        .create_table("t", dir.path().join("t.dat"), int_schema(), 4096)
        .unwrap();
    let config = StorageConfig::new()
        .with_pool_size(pool_size)
        .with_lock_timeout(Duration::from_millis(100));
    let pool = Arc::new(BufferPool::new(&config, Arc::clone(&catalog)));
    (pool, catalog, table, dir)
}

fn row(catalog: &Catalog, table: TableId, id: i32) -> Tuple {
    TupleBuilder::new(catalog.schema(table).unwrap())
        .value(id)
        .value(id as i64 * 1000)
        .build()
        .unwrap()
}

/// Writes `n` empty pages straight to the file.
fn add_pages(catalog: &Catalog, table: TableId, n: u32) {
    let file = catalog.file(table).unwrap();
    for _ in 0..n {
        file.append_empty_page().unwrap();
    }
}

#[test]
fn test_pool_size_one_evicts_clean_page() {
    let (pool, catalog, table, _dir) = create_pool(1);
    add_pages(&catalog, table, 2);
    let p1 = PageId::new(table, 0);
    let p2 = PageId::new(table, 1);

    let a = TransactionId::new(1);
    let b = TransactionId::new(2);
    pool.get_page(a, p1, Permissions::ReadOnly).unwrap();
    pool.get_page(b, p2, Permissions::ReadOnly).unwrap();

    assert!(!pool.is_cached(p1));
    assert!(pool.is_cached(p2));
    assert_eq!(pool.cached_page_count(), 1);
}

#[test]
fn test_pool_size_one_all_dirty() {
    let (pool, catalog, table, _dir) = create_pool(1);
    add_pages(&catalog, table, 2);
    let p1 = PageId::new(table, 0);
    let p2 = PageId::new(table, 1);

    let a = TransactionId::new(1);
    let b = TransactionId::new(2);
    let rid = pool.insert_tuple(a, table, row(&catalog, table, 1)).unwrap();
    assert_eq!(rid.page_id, p1);

    let err = pool.get_page(b, p2, Permissions::ReadOnly).unwrap_err();
    assert!(matches!(err, DbError::AllPagesDirty));
    assert!(pool.is_cached(p1));
    assert_eq!(pool.cached_page_count(), 1);
}

#[test]
fn test_cache_never_exceeds_pool_size() {
    let (pool, catalog, table, _dir) = create_pool(3);
    add_pages(&catalog, table, 10);
    let tid = TransactionId::new(1);

    for n in 0..10 {
        pool.get_page(tid, PageId::new(table, n), Permissions::ReadOnly).unwrap();
        assert!(pool.cached_page_count() <= 3);
    }
}

#[test]
fn test_eviction_prefers_least_recently_used() {
    let (pool, catalog, table, _dir) = create_pool(2);
    add_pages(&catalog, table, 3);
    let tid = TransactionId::new(1);
    let p = |n| PageId::new(table, n);

    pool.get_page(tid, p(0), Permissions::ReadOnly).unwrap();
    pool.get_page(tid, p(1), Permissions::ReadOnly).unwrap();
    pool.get_page(tid, p(0), Permissions::ReadOnly).unwrap();
    pool.get_page(tid, p(1), Permissions::ReadOnly).unwrap();
    pool.get_page(tid, p(0), Permissions::ReadOnly).unwrap();

    // page 1's second most recent access is older than page 0's
    pool.get_page(tid, p(2), Permissions::ReadOnly).unwrap();
    assert!(pool.is_cached(p(0)));
    assert!(!pool.is_cached(p(1)));
}

#[test]
fn test_commit_writes_pages() {
    let (pool, catalog, table, _dir) = create_pool(10);
    let tid = TransactionId::new(1);
    let rid = pool.insert_tuple(tid, table, row(&catalog, table, 7)).unwrap();

    pool.transaction_complete(tid, true).unwrap();

    let page = pool.get_page(TransactionId::new(2), rid.page_id, Permissions::ReadOnly).unwrap();
    let guard = page.read();
    assert_eq!(guard.is_dirty(), None);

    let on_disk = catalog.file(table).unwrap().read_page(rid.page_id).unwrap();
    assert_eq!(on_disk.serialize().unwrap(), guard.serialize().unwrap());
    assert_eq!(guard.before_image().unwrap().serialize().unwrap(), guard.serialize().unwrap());
    assert!(!pool.holds_lock(tid, rid.page_id));
}

#[test]
fn test_abort_restores_pages() {
    let (pool, catalog, table, _dir) = create_pool(10);
    let setup = TransactionId::new(1);
    let kept = pool.insert_tuple(setup, table, row(&catalog, table, 1)).unwrap();
    pool.transaction_complete(setup, true).unwrap();

    let tid = TransactionId::new(2);
    let page = pool.get_page(tid, kept.page_id, Permissions::ReadWrite).unwrap();
    let stored = page.read().tuples().next().unwrap().clone();
    pool.delete_tuple(tid, &stored).unwrap();
    pool.insert_tuple(tid, table, row(&catalog, table, 2)).unwrap();
    pool.insert_tuple(tid, table, row(&catalog, table, 3)).unwrap();

    pool.transaction_complete(tid, false).unwrap();

    // the handle given out earlier sees the restored contents
    let guard = page.read();
    assert_eq!(guard.is_dirty(), None);
    assert_eq!(guard.tuples().count(), 1);
    assert_eq!(guard.tuples().next(), Some(&stored));
    assert!(!pool.holds_lock(tid, kept.page_id));
}

#[test]
fn test_flush_all_pages() {
    let (pool, catalog, table, _dir) = create_pool(10);
    let tid = TransactionId::new(1);
    for i in 0..40 {
        pool.insert_tuple(tid, table, row(&catalog, table, i)).unwrap();
    }

    pool.flush_all_pages().unwrap();

    let file = catalog.file(table).unwrap();
    let on_disk: usize = (0..file.page_count())
        .map(|n| file.read_page(PageId::new(table, n)).unwrap().tuples().count())
        .sum();
    assert_eq!(on_disk, 40);
    assert!(pool.evict_page().unwrap().is_some());
}

#[test]
fn test_flush_page_of_uncached_page_is_noop() {
    let (pool, _catalog, table, _dir) = create_pool(10);
    pool.flush_page(PageId::new(table, 5)).unwrap();
}

#[test]
fn test_release_page_lets_writer_in() {
    let (pool, catalog, table, _dir) = create_pool(10);
    add_pages(&catalog, table, 1);
    let pid = PageId::new(table, 0);
    let reader = TransactionId::new(1);
    let writer = TransactionId::new(2);

    pool.get_page(reader, pid, Permissions::ReadOnly).unwrap();
    let err = pool.get_page(writer, pid, Permissions::ReadWrite).unwrap_err();
    assert!(matches!(
        err,
        DbError::TransactionAborted {
            reason: AbortReason::LockTimeout,
            ..
        }
    ));

    assert!(pool.release_page(reader, pid));
    pool.get_page(writer, pid, Permissions::ReadWrite).unwrap();
    assert!(pool.holds_lock(writer, pid));
}

#[test]
fn test_missing_page_is_reported() {
    let (pool, _catalog, table, _dir) = create_pool(10);
    let tid = TransactionId::new(1);
    let pid = PageId::new(table, 3);
    let err = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap_err();
    assert!(matches!(err, DbError::CorruptOrMissingPage(_)));

    // the lock outlives the failed load until the transaction ends
    assert!(pool.holds_lock(tid, pid));
    assert!(!pool.is_cached(pid));
    pool.transaction_complete(tid, false).unwrap();
    assert!(!pool.holds_lock(tid, pid));
}

#[test]
fn test_unknown_table() {
    let (pool, _catalog, _table, _dir) = create_pool(10);
    let err = pool
        .get_page(TransactionId::new(1), PageId::new(TableId::new(99), 0), Permissions::ReadOnly)
        .unwrap_err();
    assert!(matches!(err, DbError::TableNotFound(_)));
}

#[test]
fn test_concurrent_inserters() {
    let (pool, catalog, table, _dir) = create_pool(50);
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                let mut committed = 0;
                for i in 0..10 {
                    let tid = TransactionId::new(worker * 100 + i + 1);
                    let t = row(&catalog, table, (worker * 100 + i) as i32);
                    match pool.insert_tuple(tid, table, t) {
                        Ok(_) => {
                            pool.transaction_complete(tid, true).unwrap();
                            committed += 1;
                        }
                        Err(e) => {
                            assert!(e.is_transaction_aborted(), "{:?}", e);
                            pool.transaction_complete(tid, false).unwrap();
                        }
                    }
                }
                committed
            })
        })
        .collect();

    let committed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let file = catalog.file(table).unwrap();
    let on_disk: usize = (0..file.page_count())
        .map(|n| file.read_page(PageId::new(table, n)).unwrap().tuples().count())
        .sum();
    assert_eq!(on_disk, committed);
    assert!(committed > 0);
}
