use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::model::{ArchivedBooking, BookingId};

#[derive(Debug)]
pub struct ArchiveError(pub String);

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "archive append failed: {}", self.0)
    }
}

impl std::error::Error for ArchiveError {}

impl From<io::Error> for ArchiveError {
    fn from(e: io::Error) -> Self {
        ArchiveError(e.to_string())
    }
}

/// Sink for completed (closed or cancelled) bookings.
///
/// Implementations must treat a booking id that was already appended as a
/// successful no-op, so a retried close never produces a second record.
pub trait Archive: Send + Sync + 'static {
    fn append(&self, record: &ArchivedBooking) -> Result<(), ArchiveError>;
}

impl<T: Archive + ?Sized> Archive for Arc<T> {
    fn append(&self, record: &ArchivedBooking) -> Result<(), ArchiveError> {
        (**self).append(record)
    }
}

/// In-process archive, mostly for tests and ephemeral floors.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    records: Mutex<Vec<ArchivedBooking>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ArchivedBooking> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Archive for MemoryArchive {
    fn append(&self, record: &ArchivedBooking) -> Result<(), ArchiveError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ArchiveError("archive mutex poisoned".into()))?;
        if records.iter().any(|r| r.booking_id == record.booking_id) {
            return Ok(());
        }
        records.push(record.clone());
        Ok(())
    }
}

struct JsonlInner {
    writer: BufWriter<File>,
    seen: HashSet<BookingId>,
}

/// Append-only JSON-lines file, one record per line, fsynced per append.
pub struct JsonlArchive {
    path: PathBuf,
    inner: Mutex<JsonlInner>,
}

impl JsonlArchive {
    /// Open (or create) the archive file. Ids already present are remembered
    /// so re-appends stay idempotent across restarts.
    pub fn open(path: &Path) -> io::Result<Self> {
        let seen = Self::read_all(path)?
            .into_iter()
            .map(|r| r.booking_id)
            .collect();
        let torn = ends_mid_line(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if torn {
            // Terminate the partial record so the next one starts on its own line.
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(JsonlInner { writer, seen }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. Torn lines (crash mid-write) are skipped.
    pub fn read_all(path: &Path) -> io::Result<Vec<ArchivedBooking>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<ArchivedBooking>(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn ends_mid_line(path: &Path) -> io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl Archive for JsonlArchive {
    fn append(&self, record: &ArchivedBooking) -> Result<(), ArchiveError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ArchiveError("archive mutex poisoned".into()))?;
        if inner.seen.contains(&record.booking_id) {
            return Ok(());
        }
        let line = serde_json::to_string(record).map_err(|e| ArchiveError(e.to_string()))?;
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        inner.writer.get_ref().sync_data()?;
        inner.seen.insert(record.booking_id);
        Ok(())
    }
}
