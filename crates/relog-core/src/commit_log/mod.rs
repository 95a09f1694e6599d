//! Commit log storage
//!
//! A commit log is an append-only sequence of records addressed by offset.
//! Offsets start at 0 and increase by one per appended record.

mod file;
mod memory;

pub use file::FileCommitLog;
pub use memory::MemoryCommitLog;

use relog_api::Record;

use crate::error::LogError;

/// Append-only record storage shared by the log service and the node.
///
/// Implementations must be safe for concurrent appends and reads. Appends
/// are serialized so that offsets are dense and strictly increasing.
pub trait CommitLog: Send + Sync {
    /// Append `record` and return the offset assigned to it.
    ///
    /// Any offset already present on `record` is ignored.
    fn append(&self, record: Record) -> Result<u64, LogError>;

    /// Read the record stored at `offset`.
    ///
    /// Returns [`LogError::OffsetOutOfRange`] when nothing is stored there yet.
    fn read(&self, offset: u64) -> Result<Record, LogError>;

    /// Number of records currently stored.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the underlying resources. Calling it again is a no-op.
    fn close(&self) -> Result<(), LogError>;
}
