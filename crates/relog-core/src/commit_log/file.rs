// File-backed commit log
//
// Records are stored back to back in a single store file. Each frame is
// `len: u64 BE | crc32: u32 BE | value`. The in-memory index maps offsets to
// frame positions and is rebuilt by scanning the store on open.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use relog_api::Record;

use super::CommitLog;
use crate::error::LogError;

const STORE_FILE_NAME: &str = "store.log";
const FRAME_HEADER_LEN: u64 = 12;

struct FileState {
    file: Option<File>,
    positions: Vec<u64>,
    size: u64,
}

/// Commit log persisted under a data directory
pub struct FileCommitLog {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileCommitLog {
    /// Open (or create) the commit log stored in `dir`.
    ///
    /// A partially written trailing frame left behind by a crash is
    /// truncated away.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LogError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(STORE_FILE_NAME);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let (positions, size) = scan(&file)?;
        let file_len = file.metadata()?.len();
        if file_len != size {
            warn!(
                path = %path.display(),
                file_len,
                valid_len = size,
                "Truncating torn tail of commit log"
            );
            file.set_len(size)?;
        }

        info!(
            path = %path.display(),
            records = positions.len(),
            "Opened commit log"
        );

        Ok(Self {
            path,
            state: Mutex::new(FileState {
                file: Some(file),
                positions,
                size,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Walk the store file and collect the position of every intact frame.
fn scan(file: &File) -> Result<(Vec<u64>, u64), LogError> {
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    let mut positions = Vec::new();
    let mut position = 0u64;
    loop {
        let len = match reader.read_u64::<BigEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let checksum = match reader.read_u32::<BigEndian>() {
            Ok(checksum) => checksum,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        let mut value = Vec::new();
        let read = (&mut reader).take(len).read_to_end(&mut value)?;
        if (read as u64) < len {
            break;
        }
        if crc32fast::hash(&value) != checksum {
            debug!(position, "Checksum mismatch while scanning commit log");
            break;
        }

        positions.push(position);
        position += FRAME_HEADER_LEN + len;
    }

    Ok((positions, position))
}

impl CommitLog for FileCommitLog {
    fn append(&self, record: Record) -> Result<u64, LogError> {
        let mut state = self.state.lock();
        let position = state.size;
        let file = state.file.as_mut().ok_or(LogError::Closed)?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + record.value.len());
        frame.write_u64::<BigEndian>(record.value.len() as u64)?;
        frame.write_u32::<BigEndian>(crc32fast::hash(&record.value))?;
        frame.extend_from_slice(&record.value);

        file.seek(SeekFrom::Start(position))?;
        file.write_all(&frame)?;

        let offset = state.positions.len() as u64;
        state.positions.push(position);
        state.size = position + frame.len() as u64;
        Ok(offset)
    }

    fn read(&self, offset: u64) -> Result<Record, LogError> {
        let mut state = self.state.lock();
        if state.file.is_none() {
            return Err(LogError::Closed);
        }
        let position = *state
            .positions
            .get(offset as usize)
            .ok_or(LogError::OffsetOutOfRange(offset))?;
        let file = state.file.as_mut().ok_or(LogError::Closed)?;

        file.seek(SeekFrom::Start(position))?;
        let len = file.read_u64::<BigEndian>()?;
        let checksum = file.read_u32::<BigEndian>()?;
        let mut value = vec![0u8; len as usize];
        file.read_exact(&mut value)?;
        if crc32fast::hash(&value) != checksum {
            return Err(LogError::Corrupt { position });
        }

        Ok(Record { value, offset })
    }

    fn len(&self) -> u64 {
        self.state.lock().positions.len() as u64
    }

    fn close(&self) -> Result<(), LogError> {
        let mut state = self.state.lock();
        if let Some(file) = state.file.take() {
            file.sync_all()?;
            info!(path = %self.path.display(), "Closed commit log");
        }
        Ok(())
    }
}
