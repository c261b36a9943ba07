//! ---
//! gs_section: "03-persistence-logging"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Persistence abstractions and storage bindings."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use tracing::debug;

use crate::{PersistenceError, Result};

/// Format revision written into every record log header.
pub const RECORD_LOG_VERSION: u16 = 1;

/// Record log header stored as the first line of the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordLogHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl RecordLogHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = format!(
            "{:x}",
            sha2::Sha256::digest(created_at.to_rfc3339().as_bytes())
        );
        Self {
            version: RECORD_LOG_VERSION,
            created_at,
            hash,
        }
    }

    fn check(line: &str, path: &Path) -> Result<()> {
        let header: RecordLogHeader = serde_json::from_str(line)
            .map_err(|_| PersistenceError::MissingHeader(path.display().to_string()))?;
        if header.version != RECORD_LOG_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: header.version,
                expected: RECORD_LOG_VERSION,
            });
        }
        Ok(())
    }
}

/// One persisted record with its position in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedRecord<T> {
    /// Strictly increasing position, starting at 1.
    pub sequence: u64,
    /// Wall-clock time the record was appended.
    pub recorded_at: DateTime<Utc>,
    /// The record itself.
    pub record: T,
}

#[derive(Serialize)]
struct LoggedRecordRef<'a, T> {
    sequence: u64,
    recorded_at: DateTime<Utc>,
    record: &'a T,
}

#[derive(Deserialize)]
struct SequenceOnly {
    sequence: u64,
}

/// Append-only writer of newline-delimited JSON records.
pub struct RecordLogWriter<T> {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
    _record: PhantomData<fn(&T)>,
}

impl<T> std::fmt::Debug for RecordLogWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLogWriter")
            .field("path", &self.path)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl<T: Serialize> RecordLogWriter<T> {
    /// Open a record log for appending, writing a header if the file is new. Reopening an
    /// existing log continues its sequence.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists() && fs::metadata(path)?.len() > 0;
        let last_sequence = if exists {
            last_sequence(path)?
        } else {
            0
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if !exists {
            let line = serde_json::to_string(&RecordLogHeader::new())?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        debug!(path = %path.display(), last_sequence, "record log opened");

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence: last_sequence + 1,
            _record: PhantomData,
        })
    }

    /// Append a record and return its sequence number.
    pub fn append(&mut self, record: &T) -> Result<u64> {
        let sequence = self.next_sequence;
        let line = serde_json::to_string(&LoggedRecordRef {
            sequence,
            recorded_at: Utc::now(),
            record,
        })?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Flush buffered writes to the underlying file handle.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Location of the log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let mut lines = BufReader::new(File::open(path)?).lines();
    match lines.next() {
        Some(line) => RecordLogHeader::check(&line?, path)?,
        None => return Ok(0),
    }
    let mut last = 0u64;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<SequenceOnly>(&line) {
            last = last.max(entry.sequence);
        }
    }
    Ok(last)
}

/// Replay the log in order, invoking the callback for each record.
pub fn replay<T, F>(path: &Path, mut handler: F) -> Result<usize>
where
    T: DeserializeOwned,
    F: FnMut(LoggedRecord<T>) -> Result<()>,
{
    let mut count = 0usize;
    for entry in RecordLogReader::<T>::open(path)? {
        handler(entry?)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming iterator over the records of a log.
pub struct RecordLogReader<T> {
    lines: std::io::Lines<BufReader<File>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> RecordLogReader<T> {
    /// Open the log for sequential reading, verifying its header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut first_line = String::new();
        reader.read_line(&mut first_line)?;
        RecordLogHeader::check(first_line.trim_end(), path)?;
        Ok(Self {
            lines: reader.lines(),
            _record: PhantomData,
        })
    }
}

impl<T: DeserializeOwned> Iterator for RecordLogReader<T> {
    type Item = Result<LoggedRecord<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    return Some(serde_json::from_str(&line).map_err(PersistenceError::from))
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}
