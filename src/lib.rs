//! Heapstore - the storage core of a disk-oriented relational database
//!
//! Tables are heap files of fixed-size slotted pages. Every page access goes
//! through a buffer pool that takes page-level two-phase locks on behalf of
//! a transaction, caches decoded pages and writes them back when the
//! transaction commits.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): page format and table files
//!   - `HeapPage`: bitmap header plus fixed-length tuple slots
//!   - `HeapFile`: one table's pages in a single file, with a lazy tuple iterator
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPool`: fetches pages under locks, evicts clean pages, commits and aborts
//!   - `LruKReplacer`: LRU-K eviction order
//!
//! - **Concurrency** (`concurrency`): transactions and locking
//!   - `LockManager`: shared/exclusive page locks, upgrades, deadlock detection
//!   - `WaitForGraph`: who waits on whom
//!   - `Transaction`: commit/abort lifecycle handle
//!
//! - **Catalog** (`catalog`): table id to heap file registry
//!
//! - **Tuples** (`tuple`): fixed-width schemas, values and their encoding
//!
//! # Example
//!
//! ```rust,no_run
//! use heapstore::tuple::{DataType, Schema, TupleBuilder};
//! use heapstore::{Database, StorageConfig};
//!
//! let db = Database::open(StorageConfig::default()).unwrap();
//! let schema = Schema::builder()
//!     .column("id", DataType::Integer)
//!     .column("name", DataType::Char(16))
//!     .build_arc();
//! let table = db.create_table("users", "users.dat", schema.clone()).unwrap();
//!
//! let tx = db.begin();
//! let tuple = TupleBuilder::new(schema).value(1).value("ada").build().unwrap();
//! db.insert(&tx, table, tuple).unwrap();
//! tx.commit().unwrap();
//!
//! let tx = db.begin();
//! for tuple in db.scan(&tx, table).unwrap() {
//!     println!("{:?}", tuple.unwrap().values());
//! }
//! tx.commit().unwrap();
//! ```

pub mod buffer;
pub mod catalog;
pub mod common;
pub mod concurrency;
pub mod database;
pub mod storage;
pub mod tuple;

// Re-export commonly used types at the crate root
pub use common::{DbError, PageId, Permissions, RecordId, Result, StorageConfig, TableId, TransactionId};
pub use database::Database;
