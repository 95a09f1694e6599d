// In-memory commit log, used by tests and ephemeral nodes

use parking_lot::RwLock;

use relog_api::Record;

use super::CommitLog;
use crate::error::LogError;

#[derive(Default)]
struct MemoryState {
    values: Vec<Vec<u8>>,
    closed: bool,
}

/// Commit log that keeps every record in memory
#[derive(Default)]
pub struct MemoryCommitLog {
    state: RwLock<MemoryState>,
}

impl MemoryCommitLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommitLog for MemoryCommitLog {
    fn append(&self, record: Record) -> Result<u64, LogError> {
        let mut state = self.state.write();
        if state.closed {
            return Err(LogError::Closed);
        }
        let offset = state.values.len() as u64;
        state.values.push(record.value);
        Ok(offset)
    }

    fn read(&self, offset: u64) -> Result<Record, LogError> {
        let state = self.state.read();
        if state.closed {
            return Err(LogError::Closed);
        }
        state
            .values
            .get(offset as usize)
            .map(|value| Record {
                value: value.clone(),
                offset,
            })
            .ok_or(LogError::OffsetOutOfRange(offset))
    }

    fn len(&self) -> u64 {
        self.state.read().values.len() as u64
    }

    fn close(&self) -> Result<(), LogError> {
        self.state.write().closed = true;
        Ok(())
    }
}
