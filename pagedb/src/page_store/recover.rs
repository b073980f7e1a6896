use std::sync::Arc;

use log::{info, warn};

use super::{
    wal::{read_log, remove_log, LogContents, LogRecord},
    Error, ErrorKind, Inner, Page, PageStore, Result, METADATA_AREA_SIZE,
};

impl PageStore {
    /// Replays the log left by an interrupted commit.
    ///
    /// The records of a complete log become the modified set and are
    /// flushed to their home offsets before the log is deleted. Replaying
    /// the same log again writes the same bytes, so a crash during recovery
    /// is recovered by the next open.
    pub(super) fn recover(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.replay_log(&mut inner)
    }

    /// Applies the records of a complete log on top of the modified set.
    pub(super) fn replay_log(&self, inner: &mut Inner) -> Result<()> {
        let records = match read_log(&self.log_path)? {
            None => return Ok(()),
            Some(LogContents::Incomplete) => {
                warn!(
                    "Discard incomplete log {} of an interrupted commit",
                    self.log_path.display()
                );
                return remove_log(&self.log_path)
                    .map_err(|e| Error::with_source(ErrorKind::LogWrite, e));
            }
            Some(LogContents::Complete(records)) => records,
        };

        info!(
            "Replay {} records from log {}",
            records.len(),
            self.log_path.display()
        );
        let mut pages = 0;
        for record in records {
            match record {
                LogRecord::Page { number, image } => {
                    inner
                        .modified
                        .insert(number, Arc::new(Page::new(number, image)));
                    if number >= inner.num_pages {
                        inner.num_pages = number + 1;
                    }
                    pages += 1;
                }
                LogRecord::Metadata { area, data } => {
                    let mut bytes = [0; METADATA_AREA_SIZE];
                    bytes.copy_from_slice(data.as_ref());
                    inner.pending_metadata.insert(area, bytes);
                }
            }
        }
        self.apply(inner)?;
        self.stats.recovered_pages.add(pages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::page::PAGE_SIZE;
    use crate::page_store::{
        meta::{page_offset, Metadata},
        wal::{log_path, LogWriter},
    };

    #[test]
    fn replay_complete_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        PageStore::open(&path).unwrap().close(false);

        let log = log_path(&path);
        let mut writer = LogWriter::create(&log).unwrap();
        writer.add_page(2, &[0x22; PAGE_SIZE]).unwrap();
        writer.add_metadata(4, &[0x44; METADATA_AREA_SIZE]).unwrap();
        writer.finish(true).unwrap();
        let saved = fs::read(&log).unwrap();

        let store = PageStore::open(&path).unwrap();
        assert!(!log.exists());
        assert_eq!(store.stats().recovered_pages, 1);
        assert_eq!(store.modified_pages(), 0);
        assert_eq!(store.page_count(), 3);
        assert_eq!(store.acquire(2).unwrap().read()[8191], 0x22);
        assert_eq!(store.read_metadata_area(4).unwrap(), [0x44; METADATA_AREA_SIZE]);
        store.close(false);

        let data = fs::read(&path).unwrap();
        let home = page_offset(2) as usize;
        assert!(data[home..home + PAGE_SIZE].iter().all(|&b| b == 0x22));
        let area = Metadata::area_offset(4) as usize;
        assert!(data[area..area + METADATA_AREA_SIZE].iter().all(|&b| b == 0x44));

        // A crash after flushing but before deleting leaves the same log
        // behind. Replaying it again is harmless.
        fs::write(&log, &saved).unwrap();
        let store = PageStore::open(&path).unwrap();
        assert!(!log.exists());
        assert_eq!(store.acquire(2).unwrap().read()[0], 0x22);
        store.close(false);
        assert_eq!(fs::read(&path).unwrap(), data);
    }

    #[test]
    fn discard_incomplete_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        PageStore::open(&path).unwrap().close(false);

        let log = log_path(&path);
        let mut writer = LogWriter::create(&log).unwrap();
        writer.add_page(1, &[0x11; PAGE_SIZE]).unwrap();
        writer.finish(false).unwrap();
        let data = fs::read(&log).unwrap();
        fs::write(&log, &data[..data.len() - 1]).unwrap();

        let store = PageStore::open(&path).unwrap();
        assert!(!log.exists());
        assert_eq!(store.stats().recovered_pages, 0);
        assert_eq!(store.page_count(), 0);
        assert_eq!(store.acquire(1).unwrap().read()[0], 0);
    }

    #[test]
    fn committed_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = PageStore::open(&path).unwrap();
        {
            let page = store.acquire(7).unwrap();
            page.write()[10] = 7;
        }
        store.write_metadata_area(1, b"context").unwrap();
        store.commit().unwrap();
        assert!(!log_path(&path).exists());
        store.close(false);

        let store = PageStore::open(&path).unwrap();
        assert_eq!(store.stats().recovered_pages, 0);
        assert_eq!(store.acquire(7).unwrap().read()[10], 7);
        assert_eq!(&store.read_metadata_area(1).unwrap()[..7], b"context");
    }
}
