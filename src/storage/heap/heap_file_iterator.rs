use std::sync::Arc;
use std::vec;

use crate::buffer::BufferPool;
use crate::common::{PageId, Permissions, Result, TransactionId};
use crate::tuple::Tuple;

use super::HeapFile;

/// Iterator over the tuples of a heap file.
///
/// Pages are fetched through the buffer pool with read permission one at a
/// time, only when the tuples of the previous page are used up. The page
/// count is re-read at each page boundary, so pages appended by the same
/// transaction during the scan are visited too.
///
/// After an error the iterator is exhausted until `rewind` is called.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    next_page: u32,
    /// Tuples of the current page not yet returned
    current: vec::IntoIter<Tuple>,
    failed: bool,
}

impl HeapFileIterator {
    pub fn new(file: Arc<HeapFile>, pool: Arc<BufferPool>, tid: TransactionId) -> Self {
        Self {
            file,
            pool,
            tid,
            next_page: 0,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }

    /// Restarts the scan from the first page.
    pub fn rewind(&mut self) {
        self.next_page = 0;
        self.current = Vec::new().into_iter();
        self.failed = false;
    }

    fn load_next_page(&mut self) -> Result<()> {
        let page_id = PageId::new(self.file.table_id(), self.next_page);
        let page = self.pool.get_page(self.tid, page_id, Permissions::ReadOnly)?;
        self.next_page += 1;

        let tuples: Vec<Tuple> = page.read().tuples().cloned().collect();
        self.current = tuples.into_iter();
        Ok(())
    }
}

impl Iterator for HeapFileIterator {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(tuple) = self.current.next() {
                return Some(Ok(tuple));
            }
            if self.next_page >= self.file.page_count() {
                return None;
            }
            if let Err(e) = self.load_next_page() {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}
