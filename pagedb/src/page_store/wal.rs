//! The write-ahead log of a page store.
//!
//! ```text
//! log {
//!     magic   : 8 bytes
//!     version : 4 bytes
//!     records : multiple records
//!     trailer : a record of kind TRAILER
//! }
//!
//! record {
//!     kind     : 1 byte
//!     number   : 4 bytes (page number, area index, or record count)
//!     length   : 4 bytes
//!     checksum : 4 bytes (crc32 of kind, number, length and payload)
//!     payload  : length bytes
//! }
//! ```
//!
//! A log is written under a temporary name and renamed into place once its
//! trailer is written, so an existing log is only ever replaced by another
//! complete one. A log without a trailer left behind by a crash is an
//! interrupted commit that never touched the store file, so it is discarded
//! rather than replayed.

use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use super::{
    meta::{METADATA_AREAS, METADATA_AREA_SIZE},
    Error, ErrorKind, Result,
};
use crate::{
    page::PAGE_SIZE,
    util::field::{Buffer, Pointer, PointerMut},
};

const LOG_MAGIC: &[u8; 8] = b"PGDBLOG\0";
const LOG_VERSION: u32 = 1;
const LOG_HEADER_LEN: usize = 12;
const RECORD_HEADER_LEN: usize = 13;

/// These values are persisted to disk, don't change them.
const RECORD_KIND_PAGE: u8 = 1;
const RECORD_KIND_METADATA: u8 = 2;
const RECORD_KIND_TRAILER: u8 = 0xff;

/// A change recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogRecord {
    Page { number: u32, image: Buffer },
    Metadata { area: usize, data: Buffer },
}

/// What was found in a log file.
#[derive(Debug)]
pub(crate) enum LogContents {
    /// The log has a valid trailer.
    Complete(Vec<LogRecord>),
    /// The log was cut short before its trailer.
    Incomplete,
}

/// Returns the path of the log that belongs to a store file.
pub(crate) fn log_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(OsString::new);
    name.push(".log");
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Syncs the directory holding `path`, so that creating, renaming or
/// removing the file survives a crash.
pub(crate) fn sync_dir(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

fn checksum(kind: u8, number: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(&number.to_be_bytes());
    hasher.update(&(payload.len() as u32).to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Writes a log file from scratch.
pub(crate) struct LogWriter {
    path: PathBuf,
    temp: PathBuf,
    file: BufWriter<File>,
    records: u32,
    size: u64,
}

impl LogWriter {
    /// Starts a log that replaces the one at `path` when it is finished.
    pub(crate) fn create(path: &Path) -> Result<Self> {
        let temp = temp_path(path);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)
            .map_err(|e| Error::with_source(ErrorKind::LogCreate, e))?;
        let mut writer = Self {
            path: path.to_owned(),
            temp,
            file: BufWriter::new(file),
            records: 0,
            size: 0,
        };
        let mut header = [0u8; LOG_HEADER_LEN];
        let mut w = PointerMut::new(&mut header);
        w.put_slice(LOG_MAGIC);
        w.put_u32(LOG_VERSION);
        writer.write(&header)?;
        Ok(writer)
    }

    /// Appends the full image of a page.
    pub(crate) fn add_page(&mut self, number: u32, image: &[u8]) -> Result<()> {
        debug_assert_eq!(image.len(), PAGE_SIZE);
        self.add_record(RECORD_KIND_PAGE, number, image)
    }

    /// Appends the content of a metadata area.
    pub(crate) fn add_metadata(&mut self, area: usize, data: &[u8]) -> Result<()> {
        debug_assert!(area < METADATA_AREAS && data.len() == METADATA_AREA_SIZE);
        self.add_record(RECORD_KIND_METADATA, area as u32, data)
    }

    /// Writes the trailer, makes the log durable and moves it into place.
    ///
    /// Returns the size of the log in bytes.
    pub(crate) fn finish(mut self, sync: bool) -> Result<u64> {
        let records = self.records;
        self.add_record(RECORD_KIND_TRAILER, records, &[])?;
        self.file
            .flush()
            .map_err(|e| Error::with_source(ErrorKind::LogWrite, e))?;
        if sync {
            self.file
                .get_ref()
                .sync_all()
                .map_err(|e| Error::with_source(ErrorKind::LogWrite, e))?;
        }
        fs::rename(&self.temp, &self.path)
            .map_err(|e| Error::with_source(ErrorKind::LogCreate, e))?;
        if sync {
            sync_dir(&self.path).map_err(|e| Error::with_source(ErrorKind::LogCreate, e))?;
        }
        Ok(self.size)
    }

    fn add_record(&mut self, kind: u8, number: u32, payload: &[u8]) -> Result<()> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        let mut w = PointerMut::new(&mut header);
        w.put_u8(kind);
        w.put_u32(number);
        w.put_u32(payload.len() as u32);
        w.put_u32(checksum(kind, number, payload));
        self.write(&header)?;
        self.write(payload)?;
        if kind != RECORD_KIND_TRAILER {
            self.records += 1;
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .map_err(|e| Error::with_source(ErrorKind::LogWrite, e))?;
        self.size += data.len() as u64;
        Ok(())
    }
}

/// Reads the log at `path`, returning `None` if there is no log.
pub(crate) fn read_log(path: &Path) -> Result<Option<LogContents>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::with_source(ErrorKind::LogOpen, e)),
    };
    parse_log(&data).map(Some)
}

fn parse_log(data: &[u8]) -> Result<LogContents> {
    if data.len() < LOG_HEADER_LEN {
        return Ok(LogContents::Incomplete);
    }
    let mut r = Pointer::new(data);
    if r.get_slice(LOG_MAGIC.len()) != LOG_MAGIC {
        return Err(Error::with_source(ErrorKind::LogRead, "bad log magic"));
    }
    let version = r.get_u32();
    if version != LOG_VERSION {
        return Err(Error::with_source(
            ErrorKind::LogRead,
            format!("unknown log version {version}"),
        ));
    }

    let mut records = Vec::new();
    loop {
        if r.remaining() < RECORD_HEADER_LEN {
            return Ok(LogContents::Incomplete);
        }
        let kind = r.get_u8();
        let number = r.get_u32();
        let len = r.get_u32() as usize;
        let crc = r.get_u32();
        if r.remaining() < len {
            return Ok(LogContents::Incomplete);
        }
        let payload = r.get_slice(len);
        if checksum(kind, number, payload) != crc {
            return Ok(LogContents::Incomplete);
        }
        match kind {
            RECORD_KIND_PAGE if len == PAGE_SIZE => records.push(LogRecord::Page {
                number,
                image: Buffer::from_slice(payload),
            }),
            RECORD_KIND_METADATA
                if len == METADATA_AREA_SIZE && (number as usize) < METADATA_AREAS =>
            {
                records.push(LogRecord::Metadata {
                    area: number as usize,
                    data: Buffer::from_slice(payload),
                })
            }
            RECORD_KIND_TRAILER if number as usize == records.len() => {
                return Ok(LogContents::Complete(records));
            }
            _ => {
                return Err(Error::with_source(
                    ErrorKind::LogRead,
                    format!("malformed log record of kind {kind}"),
                ))
            }
        }
    }
}

/// Deletes the log at `path` if it exists, along with a log that was never
/// finished.
pub(crate) fn remove_log(path: &Path) -> io::Result<()> {
    for path in [temp_path(path), path.to_owned()] {
        match fs::remove_file(&path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn page_image(fill: u8) -> Vec<u8> {
        vec![fill; PAGE_SIZE]
    }

    #[test]
    fn path_of_log() {
        assert_eq!(
            log_path(Path::new("/tmp/db/store.pdb")),
            PathBuf::from("/tmp/db/store.pdb.log")
        );
    }

    #[test]
    fn write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.add_page(3, &page_image(3)).unwrap();
        writer.add_metadata(1, &[9; METADATA_AREA_SIZE]).unwrap();
        writer.add_page(8193, &page_image(7)).unwrap();
        let size = writer.finish(true).unwrap();
        assert_eq!(size, fs::metadata(&path).unwrap().len());

        let Some(LogContents::Complete(records)) = read_log(&path).unwrap() else {
            panic!("log must be complete");
        };
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0],
            LogRecord::Page {
                number: 3,
                image: Buffer::from_slice(&page_image(3)),
            }
        );
        assert_eq!(
            records[1],
            LogRecord::Metadata {
                area: 1,
                data: Buffer::from_slice(&[9; METADATA_AREA_SIZE]),
            }
        );

        remove_log(&path).unwrap();
        assert!(read_log(&path).unwrap().is_none());
        remove_log(&path).unwrap();
    }

    #[test]
    fn unfinished_log_keeps_previous() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.add_page(1, &page_image(1)).unwrap();
        writer.finish(true).unwrap();
        assert!(!temp_path(&path).exists());

        // A second log that is never finished leaves the first one alone.
        let mut writer = LogWriter::create(&path).unwrap();
        writer.add_page(2, &page_image(2)).unwrap();
        drop(writer);
        let Some(LogContents::Complete(records)) = read_log(&path).unwrap() else {
            panic!("log must be complete");
        };
        assert_eq!(records.len(), 1);

        remove_log(&path).unwrap();
        assert!(!path.exists());
        assert!(!temp_path(&path).exists());
        sync_dir(&path).unwrap();
    }

    #[test]
    fn torn_logs_are_incomplete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.add_page(1, &page_image(1)).unwrap();
        writer.add_page(2, &page_image(2)).unwrap();
        writer.finish(false).unwrap();
        let data = fs::read(&path).unwrap();

        // Without the trailer.
        let cut = data.len() - RECORD_HEADER_LEN;
        assert!(matches!(
            parse_log(&data[..cut]).unwrap(),
            LogContents::Incomplete
        ));
        // In the middle of a page image.
        assert!(matches!(
            parse_log(&data[..LOG_HEADER_LEN + 100]).unwrap(),
            LogContents::Incomplete
        ));
        // With a corrupted payload byte.
        let mut corrupted = data.clone();
        corrupted[LOG_HEADER_LEN + RECORD_HEADER_LEN + 10] ^= 0xff;
        assert!(matches!(
            parse_log(&corrupted).unwrap(),
            LogContents::Incomplete
        ));
        assert!(matches!(
            parse_log(&data[..5]).unwrap(),
            LogContents::Incomplete
        ));
    }

    #[test]
    fn foreign_files_are_rejected() {
        let err = parse_log(b"NOTALOG!\0\0\0\x01").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LogRead);
    }
}
