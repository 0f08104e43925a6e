//! Append-only marker storage for the sync check
//!
//! One line per write, never truncated. Appends from this process are
//! serialized; other processes writing the same file are not coordinated.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to append to {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("last line of {path} is not valid UTF-8")]
    InvalidUtf8 { path: PathBuf },
}

/// Bytes read per step when scanning back from the end of the file
const TAIL_CHUNK: u64 = 4096;

/// Line file holding sync markers
#[derive(Debug)]
pub struct MarkerStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `line`, creating the file on first write
    pub async fn append(&self, line: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        let append_err = |source| StorageError::Append {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(append_err)?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(append_err)?;
        file.flush().await.map_err(append_err)?;

        debug!(path = %self.path.display(), "Appended marker");
        Ok(())
    }

    /// Last non-empty line, or `None` if nothing was written yet
    ///
    /// Reads backwards from the end, so the cost does not grow with history.
    pub async fn last_line(&self) -> Result<Option<String>, StorageError> {
        let read_err = |source| StorageError::Read {
            path: self.path.clone(),
            source,
        };

        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(read_err(source)),
        };

        let mut start = file.metadata().await.map_err(read_err)?.len();
        // Everything from `start` to the end of the file
        let mut tail: Vec<u8> = Vec::new();
        while start > 0 {
            let chunk_start = start.saturating_sub(TAIL_CHUNK);
            let mut chunk = vec![0u8; (start - chunk_start) as usize];
            file.seek(SeekFrom::Start(chunk_start))
                .await
                .map_err(read_err)?;
            file.read_exact(&mut chunk).await.map_err(read_err)?;
            chunk.extend_from_slice(&tail);
            tail = chunk;
            start = chunk_start;

            if let Some(line) = last_complete_line(&tail, start == 0) {
                return String::from_utf8(line.to_vec())
                    .map(Some)
                    .map_err(|_| StorageError::InvalidUtf8 {
                        path: self.path.clone(),
                    });
            }
        }
        Ok(None)
    }
}

/// Last non-blank line of `buf`, without its line ending
///
/// The first segment only counts as a line when `buf` starts the file;
/// otherwise it may be the tail of a longer line and `None` is returned.
fn last_complete_line(buf: &[u8], at_file_start: bool) -> Option<&[u8]> {
    let mut segments = buf.split(|b| *b == b'\n').rev().peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() && !at_file_start {
            return None;
        }
        let segment = segment.strip_suffix(b"\r").unwrap_or(segment);
        if !segment.iter().all(u8::is_ascii_whitespace) {
            return Some(segment);
        }
    }
    None
}
