use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::buffer::BufferPool;
use crate::catalog::Catalog;
use crate::common::{RecordId, Result, StorageConfig, TableId, TransactionId};
use crate::concurrency::Transaction;
use crate::storage::heap::HeapFileIterator;
use crate::tuple::{Schema, Tuple};

/// Entry point that ties the catalog, the buffer pool and transaction ids
/// together. Several independent databases can live in one process.
pub struct Database {
    config: StorageConfig,
    catalog: Arc<Catalog>,
    buffer_pool: Arc<BufferPool>,
    next_txn_id: AtomicU64,
}

impl Database {
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(Catalog::new());
        let buffer_pool = Arc::new(BufferPool::new(&config, Arc::clone(&catalog)));
        debug!(
            page_size = config.page_size,
            pool_size = config.pool_size,
            "opened database"
        );
        Ok(Self {
            config,
            catalog,
            buffer_pool,
            next_txn_id: AtomicU64::new(1),
        })
    }

    /// Registers a table stored in the heap file at `path`.
    pub fn create_table<P: AsRef<Path>>(
        &self,
        name: &str,
        path: P,
        schema: Arc<Schema>,
    ) -> Result<TableId> {
        self.catalog
            .create_table(name, path, schema, self.config.page_size)
    }

    /// Starts a transaction with a fresh, increasing id.
    pub fn begin(&self) -> Transaction {
        let id = TransactionId::new(self.next_txn_id.fetch_add(1, Ordering::Relaxed));
        Transaction::new(id, Arc::clone(&self.buffer_pool))
    }

    pub fn insert(&self, tx: &Transaction, table_id: TableId, tuple: Tuple) -> Result<RecordId> {
        self.buffer_pool.insert_tuple(tx.id(), table_id, tuple)
    }

    pub fn delete(&self, tx: &Transaction, tuple: &Tuple) -> Result<()> {
        self.buffer_pool.delete_tuple(tx.id(), tuple)
    }

    /// Scans every tuple of the table under the transaction's read locks.
    pub fn scan(&self, tx: &Transaction, table_id: TableId) -> Result<HeapFileIterator> {
        let file = self.catalog.file(table_id)?;
        Ok(file.iter(&self.buffer_pool, tx.id()))
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }
}
