use std::fmt;

use thiserror::Error;

use super::types::{PageId, RecordId, TableId, TransactionId};

/// Why a transaction was aborted by the lock manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Waiting for the lock would close a cycle in the wait-for graph
    Deadlock,
    /// The lock could not be granted before the wait deadline
    LockTimeout,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Deadlock => write!(f, "deadlock detected"),
            AbortReason::LockTimeout => write!(f, "lock wait timed out"),
        }
    }
}

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transaction {tid} aborted: {reason}")]
    TransactionAborted { tid: TransactionId, reason: AbortReason },

    #[error("Page {0} has no empty slot")]
    PageFull(PageId),

    #[error("Tuple schema does not match the schema of page {0}")]
    SchemaMismatch(PageId),

    #[error("Invalid delete of {record}: {reason}")]
    InvalidDelete {
        record: String,
        reason: &'static str,
    },

    #[error("Buffer pool is full and every cached page is dirty")]
    AllPagesDirty,

    #[error("Page {0} is missing or corrupt")]
    CorruptOrMissingPage(PageId),

    #[error("Page {page_id} is beyond the end of a file with {page_count} pages")]
    PageOutOfRange { page_id: PageId, page_count: u32 },

    #[error("Table {0} not found")]
    TableNotFound(TableId),

    #[error("Table {0} already exists")]
    TableAlreadyExists(String),

    #[error("Invalid tuple: {0}")]
    InvalidTuple(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DbError {
    pub(crate) fn invalid_delete(record: Option<RecordId>, reason: &'static str) -> Self {
        let record = record
            .map(|rid| rid.to_string())
            .unwrap_or_else(|| "<unplaced tuple>".to_string());
        DbError::InvalidDelete { record, reason }
    }

    /// Returns true if the caller must treat the transaction as rolled back.
    pub fn is_transaction_aborted(&self) -> bool {
        matches!(self, DbError::TransactionAborted { .. })
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
