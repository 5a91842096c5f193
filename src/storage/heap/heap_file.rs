use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{BufferPool, PageRef};
use crate::common::{DbError, PageId, Permissions, RecordId, Result, TableId, TransactionId};
use crate::storage::page::HeapPage;
use crate::tuple::{Schema, Tuple};

use super::HeapFileIterator;

/// HeapFile stores one table as a gap-free sequence of heap pages.
/// Page n occupies bytes [n * page_size, (n + 1) * page_size) of the
/// backing file; there is no file header.
///
/// Reads and writes go straight to disk. Tuple-level operations fetch pages
/// through the buffer pool so they are locked on behalf of the transaction.
pub struct HeapFile {
    table_id: TableId,
    schema: Arc<Schema>,
    page_size: usize,
    /// The backing file
    file: Mutex<File>,
    path: PathBuf,
    /// Number of whole pages in the file
    num_pages: AtomicU32,
}

impl HeapFile {
    /// Opens the backing file at `path`, creating it if it doesn't exist.
    /// A trailing partial page is ignored.
    pub fn open<P: AsRef<Path>>(
        table_id: TableId,
        path: P,
        schema: Arc<Schema>,
        page_size: usize,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / page_size as u64) as u32;

        debug!(
            table = table_id.as_u32(),
            path = %path.as_ref().display(),
            pages = num_pages,
            "opened heap file"
        );

        Ok(Self {
            table_id,
            schema,
            page_size,
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
            num_pages: AtomicU32::new(num_pages),
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages in the file.
    pub fn page_count(&self) -> u32 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Reads and decodes one page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<HeapPage> {
        let mut data = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.offset(page_id)))?;
            match file.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Err(DbError::CorruptOrMissingPage(page_id));
                }
                Err(e) => return Err(e.into()),
            }
        }
        HeapPage::new(page_id, Arc::clone(&self.schema), &data)
    }

    /// Writes a page back to its slot in the file. Writing the page just
    /// past the end extends the file by one page.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let page_id = page.page_id();
        let data = page.serialize()?;

        let mut file = self.file.lock();
        let page_count = self.page_count();
        if page_id.page_number() > page_count {
            return Err(DbError::PageOutOfRange {
                page_id,
                page_count,
            });
        }

        file.seek(SeekFrom::Start(self.offset(page_id)))?;
        file.write_all(&data)?;
        file.flush()?;

        if page_id.page_number() == page_count {
            self.num_pages.store(page_count + 1, Ordering::Release);
        }
        Ok(())
    }

    /// Appends one all-zero page and returns its id.
    pub fn append_empty_page(&self) -> Result<PageId> {
        let mut file = self.file.lock();
        let page_number = self.page_count();
        let page_id = PageId::new(self.table_id, page_number);

        file.seek(SeekFrom::Start(self.offset(page_id)))?;
        file.write_all(&HeapPage::empty_page_data(self.page_size))?;
        file.flush()?;
        self.num_pages.store(page_number + 1, Ordering::Release);

        debug!(table = self.table_id.as_u32(), page = page_number, "appended empty page");
        Ok(page_id)
    }

    /// Inserts the tuple into the first page with a free slot, appending a
    /// page when every existing one is full. Returns the tuple's record id
    /// and the page that was modified.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<(RecordId, Vec<PageRef>)> {
        if !Arc::ptr_eq(tuple.schema(), &self.schema) && **tuple.schema() != *self.schema {
            return Err(DbError::SchemaMismatch(PageId::new(self.table_id, 0)));
        }

        for page_number in 0..self.page_count() {
            let page_id = PageId::new(self.table_id, page_number);
            let page = pool.get_page(tid, page_id, Permissions::ReadWrite)?;

            let record_id = {
                let mut guard = page.write();
                if guard.empty_slot_count() == 0 {
                    continue;
                }
                guard.insert_tuple(tuple)?
            };
            return Ok((record_id, vec![page]));
        }

        // Every page is full. Another inserter may claim a freshly appended
        // page before we lock it, so keep appending until one has room.
        loop {
            let page_id = self.append_empty_page()?;
            let page = pool.get_page(tid, page_id, Permissions::ReadWrite)?;

            let inserted = page.write().insert_tuple(tuple.clone());
            match inserted {
                Ok(record_id) => return Ok((record_id, vec![page])),
                Err(DbError::PageFull(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Deletes the tuple from the page named by its record id and returns
    /// that page.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageRef>> {
        let record_id = tuple.record_id();
        let rid =
            record_id.ok_or_else(|| DbError::invalid_delete(None, "tuple has no record id"))?;
        if rid.page_id.table_id() != self.table_id {
            return Err(DbError::invalid_delete(record_id, "tuple belongs to another table"));
        }
        if rid.page_id.page_number() >= self.page_count() {
            return Err(DbError::invalid_delete(record_id, "page is past the end of the file"));
        }

        let page = pool.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        page.write().delete_tuple(tuple)?;
        Ok(vec![page])
    }

    /// Returns a lazy iterator over every tuple in the file, in page order.
    /// Pages are read-locked on behalf of `tid` as the iterator reaches them.
    pub fn iter(self: &Arc<Self>, pool: &Arc<BufferPool>, tid: TransactionId) -> HeapFileIterator {
        HeapFileIterator::new(Arc::clone(self), Arc::clone(pool), tid)
    }

    fn offset(&self, page_id: PageId) -> u64 {
        page_id.page_number() as u64 * self.page_size as u64
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("table_id", &self.table_id)
            .field("path", &self.path)
            .field("page_count", &self.page_count())
            .finish()
    }
}
