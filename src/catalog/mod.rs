use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::common::{DbError, Result, TableId};
use crate::storage::heap::HeapFile;
use crate::storage::page::{slot_count, MAX_SLOTS_PER_PAGE};
use crate::tuple::Schema;

#[derive(Default)]
struct CatalogInner {
    files: HashMap<TableId, Arc<HeapFile>>,
    names: HashMap<String, TableId>,
    next_table_id: u32,
}

/// Registry of the tables known to a database: table id to heap file and
/// table name to table id. Table ids are handed out sequentially from 1.
#[derive(Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (creating if needed) the heap file at `path` and registers it
    /// under `name`.
    pub fn create_table<P: AsRef<Path>>(
        &self,
        name: &str,
        path: P,
        schema: Arc<Schema>,
        page_size: usize,
    ) -> Result<TableId> {
        if schema.column_count() == 0 {
            return Err(DbError::InvalidConfig(format!("table '{}' has no columns", name)));
        }
        let slots = slot_count(page_size, schema.tuple_size());
        if slots == 0 {
            return Err(DbError::InvalidConfig(format!(
                "a {}-byte tuple of table '{}' does not fit in a {}-byte page",
                schema.tuple_size(),
                name,
                page_size
            )));
        }
        if slots > MAX_SLOTS_PER_PAGE {
            return Err(DbError::InvalidConfig(format!(
                "{} slots per page exceed the slot id range",
                slots
            )));
        }

        let mut inner = self.inner.write();
        if inner.names.contains_key(name) {
            return Err(DbError::TableAlreadyExists(name.to_string()));
        }

        // the id is only taken once the file is open
        let table_id = TableId::new(inner.next_table_id + 1);
        let file = HeapFile::open(table_id, path, schema, page_size)?;
        inner.next_table_id = table_id.as_u32();

        debug!(table = table_id.as_u32(), name, slots, "registered table");
        inner.files.insert(table_id, Arc::new(file));
        inner.names.insert(name.to_string(), table_id);
        Ok(table_id)
    }

    /// Returns the heap file backing the table.
    pub fn file(&self, table_id: TableId) -> Result<Arc<HeapFile>> {
        self.inner
            .read()
            .files
            .get(&table_id)
            .cloned()
            .ok_or(DbError::TableNotFound(table_id))
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.inner.read().names.get(name).copied()
    }

    pub fn schema(&self, table_id: TableId) -> Result<Arc<Schema>> {
        self.file(table_id).map(|file| Arc::clone(file.schema()))
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.inner.read().files.keys().copied().collect();
        ids.sort();
        ids
    }
}
