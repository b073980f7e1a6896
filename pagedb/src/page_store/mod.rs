//! A file of fixed-size pages with write-ahead logged commits.
//!
//! Pages are acquired as [`PageGuard`]s. Modified pages stay in memory until
//! [`PageStore::commit`] writes them, together with staged metadata, to the
//! log and then to their home offsets. A log left behind by a crash is
//! replayed when the store is opened again.

use std::{
    collections::BTreeMap,
    fmt,
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    mem,
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, trace, warn};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;

use crate::{
    page::{class_of, space_map_page_of, PageKind, SpaceMapMut, SpaceMapRef, PAGE_SIZE},
    util::field::Buffer,
};

mod error;
pub use error::{Error, ErrorKind, Result};

mod meta;
pub use meta::{METADATA_AREAS, METADATA_AREA_SIZE};
use meta::{
    check_area, page_count, page_offset, Metadata, FORMAT_VERSION, METADATA_SIZE, VERSION_AREA,
};

mod wal;
use wal::{log_path, remove_log, sync_dir, LogWriter};

mod cache;
use cache::PageCache;

mod stats;
use stats::AtomicPageStoreStats;
pub use stats::PageStoreStats;

mod recover;

/// Options to configure a page store.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct PageStoreOptions {
    /// The number of clean released pages kept in memory.
    ///
    /// Zero disables the cache.
    ///
    /// Default: 1024
    pub cache_capacity: usize,

    /// If true, commits sync the log and the store file to disk.
    ///
    /// Default: true
    pub sync_on_commit: bool,
}

impl Default for PageStoreOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            sync_on_commit: true,
        }
    }
}

/// An in-memory page.
pub(crate) struct Page {
    number: u32,
    kind: PageKind,
    data: RwLock<Buffer>,
}

impl Page {
    fn new(number: u32, data: Buffer) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            number,
            kind: PageKind::of(number),
            data: RwLock::new(data),
        }
    }

    #[cfg(test)]
    fn zeroed(number: u32) -> Self {
        Self::new(number, Buffer::new(PAGE_SIZE))
    }

    fn number(&self) -> u32 {
        self.number
    }
}

struct Acquired {
    page: Arc<Page>,
    refs: usize,
}

struct Inner {
    file: File,
    num_pages: u32,
    metadata: Metadata,
    pending_metadata: BTreeMap<usize, [u8; METADATA_AREA_SIZE]>,
    acquired: FxHashMap<u32, Acquired>,
    modified: BTreeMap<u32, Arc<Page>>,
    cache: PageCache,
    /// A complete log whose changes may be partly applied to the file.
    log_pending: bool,
}

/// A paged file with transactional commits.
pub struct PageStore {
    path: PathBuf,
    log_path: PathBuf,
    options: PageStoreOptions,
    inner: Mutex<Inner>,
    stats: AtomicPageStoreStats,
}

impl PageStore {
    /// Opens the store at `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, PageStoreOptions::default())
    }

    /// Opens the store at `path`, creating it if it does not exist.
    ///
    /// A log left by an interrupted commit is replayed before this returns.
    pub fn open_with<P: AsRef<Path>>(path: P, options: PageStoreOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let exists = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| {
                let kind = if exists {
                    ErrorKind::Open
                } else {
                    ErrorKind::Create
                };
                Error::with_source(kind, e)
            })?;
        let len = file
            .metadata()
            .map_err(|e| Error::with_source(ErrorKind::Length, e))?
            .len();

        let mut region = Buffer::new(METADATA_SIZE);
        read_at(&mut file, 0, region.as_mut()).map_err(|e| Error::with_source(ErrorKind::Read, e))?;
        let mut metadata = Metadata::from_slice(region.as_ref());
        match metadata.version() {
            FORMAT_VERSION => {}
            0 => {
                metadata.set_version(FORMAT_VERSION);
                write_at(&mut file, 0, metadata.as_bytes())
                    .and_then(|_| file.sync_all())
                    .map_err(|e| Error::with_source(ErrorKind::Create, e))?;
                info!("Initialize page store {}", path.display());
            }
            version => {
                return Err(Error::with_source(
                    ErrorKind::Conversion,
                    format!("unknown format version {version}"),
                ))
            }
        }

        let num_pages = page_count(len);
        let inner = Inner {
            file,
            num_pages,
            metadata,
            pending_metadata: BTreeMap::new(),
            acquired: FxHashMap::default(),
            modified: BTreeMap::new(),
            cache: PageCache::new(options.cache_capacity),
            log_pending: false,
        };
        let store = Self {
            log_path: log_path(&path),
            path,
            options,
            inner: Mutex::new(inner),
            stats: AtomicPageStoreStats::default(),
        };
        store.recover()?;
        info!(
            "Open page store {} with {} pages",
            store.path.display(),
            store.page_count()
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &PageStoreOptions {
        &self.options
    }

    /// Returns the format version recorded in the metadata region.
    pub fn format_version(&self) -> u32 {
        self.inner.lock().metadata.version()
    }

    /// Returns the number of pages in the store, including pages that only
    /// exist in memory so far.
    pub fn page_count(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Returns the number of acquired pages that have not been released.
    pub fn outstanding_pages(&self) -> usize {
        self.inner.lock().acquired.len()
    }

    /// Returns the number of modified pages waiting for a commit.
    pub fn modified_pages(&self) -> usize {
        self.inner.lock().modified.len()
    }

    pub fn stats(&self) -> PageStoreStats {
        self.stats.snapshot()
    }

    /// Acquires the page with the given number.
    ///
    /// Pages beyond the end of the store read as zeros and extend it.
    pub fn acquire(&self, number: u32) -> Result<PageGuard<'_>> {
        let mut inner = self.inner.lock();
        if let Some(acquired) = inner.acquired.get_mut(&number) {
            acquired.refs += 1;
            trace!("Acquire page {} again, refs {}", number, acquired.refs);
            return Ok(PageGuard::new(self, acquired.page.clone()));
        }

        let modified = inner.modified.get(&number).cloned();
        let page = if let Some(page) = modified {
            page
        } else if let Some(page) = inner.cache.take(number) {
            self.stats.cache_hits.inc();
            page
        } else {
            self.stats.cache_misses.inc();
            let mut data = Buffer::new(PAGE_SIZE);
            read_at(&mut inner.file, page_offset(number), data.as_mut()).map_err(|e| {
                Error::with_source(ErrorKind::Read, format!("page {number}: {e}"))
            })?;
            self.stats.page_reads.inc();
            Arc::new(Page::new(number, data))
        };
        if number >= inner.num_pages {
            inner.num_pages = number + 1;
        }
        inner.acquired.insert(
            number,
            Acquired {
                page: page.clone(),
                refs: 1,
            },
        );
        trace!("Acquire page {number}");
        Ok(PageGuard::new(self, page))
    }

    fn release_page(&self, page: &Arc<Page>) {
        let mut inner = self.inner.lock();
        let number = page.number;
        let Some(acquired) = inner.acquired.get_mut(&number) else {
            return;
        };
        acquired.refs -= 1;
        if acquired.refs > 0 {
            return;
        }
        inner.acquired.remove(&number);
        trace!("Release page {number}");
        if !inner.modified.contains_key(&number) {
            inner.cache.insert(page.clone());
        }
    }

    fn mark_page_dirty(&self, page: &Arc<Page>) {
        let mut inner = self.inner.lock();
        if inner.modified.insert(page.number, page.clone()).is_none() {
            trace!("Mark page {} dirty", page.number);
        }
    }

    /// Adds an acquired page to the modified set.
    ///
    /// Returns false if the page is not acquired.
    pub fn mark_dirty(&self, number: u32) -> bool {
        let mut inner = self.inner.lock();
        let Some(page) = inner.acquired.get(&number).map(|a| a.page.clone()) else {
            return false;
        };
        inner.modified.insert(number, page);
        true
    }

    /// Reads a metadata area, including staged writes.
    pub fn read_metadata_area(&self, i: usize) -> Result<[u8; METADATA_AREA_SIZE]> {
        check_area(i, 0)?;
        let inner = self.inner.lock();
        Ok(match inner.pending_metadata.get(&i) {
            Some(area) => *area,
            None => inner.metadata.area(i),
        })
    }

    /// Stages a write of a metadata area. Shorter data is zero-padded.
    ///
    /// The write becomes durable with the next commit. Area 0 holds the
    /// format version and cannot be written.
    pub fn write_metadata_area(&self, i: usize, data: &[u8]) -> Result<()> {
        check_area(i, data.len())?;
        if i == VERSION_AREA {
            return Err(Error::with_source(
                ErrorKind::MetadataRequest,
                "area 0 holds the format version",
            ));
        }
        let mut area = [0; METADATA_AREA_SIZE];
        area[..data.len()].copy_from_slice(data);
        self.inner.lock().pending_metadata.insert(i, area);
        Ok(())
    }

    /// Returns the guaranteed free bytes of an object-area page.
    pub fn free_space(&self, number: u32) -> Result<usize> {
        if PageKind::of(number).is_space_map() {
            return Ok(0);
        }
        let map = self.acquire(space_map_page_of(number))?;
        let free = SpaceMapRef::new(map.number(), &map.read()).free_space(number);
        Ok(free)
    }

    /// Records the free bytes of an object-area page in its space map.
    pub fn set_free_space(&self, number: u32, free_bytes: usize) -> Result<()> {
        if PageKind::of(number).is_space_map() {
            return Ok(());
        }
        let map = self.acquire(space_map_page_of(number))?;
        let current = SpaceMapRef::new(map.number(), &map.read()).class(number);
        if current == Some(class_of(free_bytes)) {
            return Ok(());
        }
        let mut data = map.write();
        SpaceMapMut::new(map.number(), &mut data).set_free_space(number, free_bytes);
        Ok(())
    }

    /// Makes all modified pages and staged metadata durable.
    ///
    /// On failure the modified set is left as it was, so the commit can be
    /// retried.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.modified.is_empty() && inner.pending_metadata.is_empty() {
            return Ok(());
        }
        let pages = inner.modified.len();
        let log_size = self.write_log(&inner)?;
        if let Err(err) = self.apply(&mut inner) {
            inner.log_pending = true;
            return Err(err);
        }
        self.stats.commits.inc();
        debug!("Commit {pages} pages with a log of {log_size} bytes");
        Ok(())
    }

    /// Discards all modified pages and staged metadata.
    ///
    /// Fails if any page is still acquired. A commit that failed after its
    /// log was complete is finished from the log first, since the file may
    /// already hold part of it.
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.acquired.is_empty() {
            return Err(Error::with_source(
                ErrorKind::Generic,
                format!("{} pages are still acquired", inner.acquired.len()),
            ));
        }
        let discarded = mem::take(&mut inner.modified).len();
        inner.pending_metadata.clear();
        if inner.log_pending {
            warn!("Finish the failed commit from {}", self.log_path.display());
            self.replay_log(&mut inner)?;
            inner.log_pending = false;
        }
        let len = inner
            .file
            .metadata()
            .map_err(|e| Error::with_source(ErrorKind::Length, e))?
            .len();
        inner.num_pages = page_count(len);
        debug!("Roll back {discarded} modified pages");
        Ok(())
    }

    /// Closes the store, committing first if `commit` is true.
    ///
    /// A failed commit is logged and otherwise ignored.
    pub fn close(self, commit: bool) {
        if commit {
            if let Err(err) = self.commit() {
                warn!("Close page store {} without commit: {}", self.path.display(), err);
            }
        }
        info!("Close page store {}", self.path.display());
    }

    fn write_log(&self, inner: &Inner) -> Result<u64> {
        let mut writer = LogWriter::create(&self.log_path)?;
        for (&number, page) in &inner.modified {
            let data = page.data.try_read().ok_or_else(|| {
                Error::with_source(
                    ErrorKind::Commit,
                    format!("page {number} is being written"),
                )
            })?;
            writer.add_page(number, data.as_ref())?;
        }
        for (&i, area) in &inner.pending_metadata {
            writer.add_metadata(i, area)?;
        }
        let records = inner.modified.len() + inner.pending_metadata.len();
        let size = writer.finish(self.options.sync_on_commit)?;
        self.stats.log_records.add(records as u64);
        Ok(size)
    }

    /// Writes modified pages and staged metadata to their home offsets and
    /// deletes the log.
    fn apply(&self, inner: &mut Inner) -> Result<()> {
        for (&number, page) in &inner.modified {
            let data = page.data.read();
            write_at(&mut inner.file, page_offset(number), data.as_ref()).map_err(|e| {
                Error::with_source(ErrorKind::Write, format!("page {number}: {e}"))
            })?;
            self.stats.page_writes.inc();
        }
        for (&i, area) in &inner.pending_metadata {
            write_at(&mut inner.file, Metadata::area_offset(i), area)
                .map_err(|e| Error::with_source(ErrorKind::Write, e))?;
        }
        if self.options.sync_on_commit {
            inner
                .file
                .sync_all()
                .map_err(|e| Error::with_source(ErrorKind::Commit, e))?;
        }
        remove_log(&self.log_path).map_err(|e| Error::with_source(ErrorKind::Commit, e))?;
        if self.options.sync_on_commit {
            sync_dir(&self.log_path).map_err(|e| Error::with_source(ErrorKind::Commit, e))?;
        }
        inner.log_pending = false;

        for (i, area) in mem::take(&mut inner.pending_metadata) {
            inner.metadata.set_area(i, &area);
        }
        for (number, page) in mem::take(&mut inner.modified) {
            if !inner.acquired.contains_key(&number) {
                inner.cache.insert(page);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageStore")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

/// An acquired page. Dropping the guard releases the page.
pub struct PageGuard<'a> {
    store: &'a PageStore,
    page: Arc<Page>,
}

impl<'a> PageGuard<'a> {
    fn new(store: &'a PageStore, page: Arc<Page>) -> Self {
        Self { store, page }
    }

    pub fn number(&self) -> u32 {
        self.page.number
    }

    pub fn kind(&self) -> PageKind {
        self.page.kind
    }

    /// Returns the bytes of the page.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.page.data.read(), |data| data.as_ref())
    }

    /// Returns the bytes of the page for writing.
    ///
    /// The page is marked dirty when the returned guard is dropped.
    pub fn write(&self) -> PageWrite<'_> {
        PageWrite {
            guard: self,
            data: self.page.data.write(),
        }
    }

    /// Releases the page.
    pub fn release(self) {}
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.store.release_page(&self.page);
    }
}

impl fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageGuard")
            .field("number", &self.page.number)
            .field("kind", &self.page.kind)
            .finish()
    }
}

/// Write access to an acquired page.
pub struct PageWrite<'a> {
    guard: &'a PageGuard<'a>,
    data: RwLockWriteGuard<'a, Buffer>,
}

impl Deref for PageWrite<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl DerefMut for PageWrite<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}

impl Drop for PageWrite<'_> {
    fn drop(&mut self) {
        self.guard.store.mark_page_dirty(&self.guard.page);
    }
}

/// Reads `buf.len()` bytes at `offset`. Bytes beyond the end of the file
/// read as zeros.
fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    buf[filled..].fill(0);
    Ok(())
}

fn write_at(file: &mut File, offset: u64, buf: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn fill(store: &PageStore, number: u32, value: u8) {
        let page = store.acquire(number).unwrap();
        page.write().fill(value);
    }

    fn read_byte(store: &PageStore, number: u32) -> u8 {
        let page = store.acquire(number).unwrap();
        let value = page.read()[100];
        value
    }

    #[test]
    fn open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = PageStore::open(&path).unwrap();
        assert_eq!(store.page_count(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), METADATA_SIZE as u64);
        let area = store.read_metadata_area(0).unwrap();
        assert_eq!(&area[..4], &FORMAT_VERSION.to_be_bytes());
        store.close(true);
    }

    #[test]
    fn commit_durability() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = PageStore::open(&path).unwrap();
        fill(&store, 1, 0x11);
        fill(&store, 5, 0x55);
        assert_eq!(store.page_count(), 6);
        assert_eq!(store.modified_pages(), 2);
        store.commit().unwrap();
        assert_eq!(store.modified_pages(), 0);
        assert!(!log_path(&path).exists());
        let stats = store.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.page_writes, 2);
        assert_eq!(stats.log_records, 2);
        store.close(false);

        let store = PageStore::open(&path).unwrap();
        assert_eq!(store.page_count(), 6);
        assert_eq!(read_byte(&store, 1), 0x11);
        assert_eq!(read_byte(&store, 5), 0x55);
        assert_eq!(read_byte(&store, 3), 0);
        assert_eq!(store.outstanding_pages(), 0);
    }

    #[test]
    fn commit_without_changes() {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("store.pdb")).unwrap();
        {
            let page = store.acquire(2).unwrap();
            let _ = page.read()[0];
        }
        store.commit().unwrap();
        assert_eq!(store.stats().commits, 0);
    }

    #[test]
    fn reference_counts() {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("store.pdb")).unwrap();
        let a = store.acquire(1).unwrap();
        let b = store.acquire(1).unwrap();
        let c = store.acquire(2).unwrap();
        assert_eq!(store.outstanding_pages(), 2);
        a.write()[0] = 9;
        assert_eq!(b.read()[0], 9);
        drop(a);
        assert_eq!(store.outstanding_pages(), 2);
        b.release();
        c.release();
        assert_eq!(store.outstanding_pages(), 0);
        // Dirty pages outlive their release.
        assert_eq!(store.acquire(1).unwrap().read()[0], 9);
    }

    #[test]
    fn cache_hits() {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("store.pdb")).unwrap();
        fill(&store, 1, 1);
        store.commit().unwrap();
        let before = store.stats();
        assert_eq!(read_byte(&store, 1), 1);
        assert_eq!(read_byte(&store, 2), 0);
        assert_eq!(read_byte(&store, 2), 0);
        let delta = store.stats().sub(&before);
        assert_eq!(delta.cache_hits, 2);
        assert_eq!(delta.cache_misses, 1);
        assert_eq!(delta.page_reads, 1);
    }

    #[test]
    fn rollback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = PageStore::open(&path).unwrap();
        fill(&store, 1, 1);
        store.commit().unwrap();
        fill(&store, 1, 2);
        fill(&store, 9, 9);
        store.write_metadata_area(3, b"staged").unwrap();

        let page = store.acquire(1).unwrap();
        assert_eq!(store.rollback().unwrap_err().kind(), ErrorKind::Generic);
        page.release();

        store.rollback().unwrap();
        assert_eq!(store.page_count(), 2);
        assert_eq!(read_byte(&store, 1), 1);
        assert_eq!(read_byte(&store, 9), 0);
        assert_eq!(store.read_metadata_area(3).unwrap(), [0; METADATA_AREA_SIZE]);
    }

    #[test]
    fn metadata_areas() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = PageStore::open(&path).unwrap();
        store.write_metadata_area(15, &[7; METADATA_AREA_SIZE]).unwrap();
        store.write_metadata_area(2, b"abc").unwrap();
        assert_eq!(&store.read_metadata_area(2).unwrap()[..4], b"abc\0");
        let err = store.write_metadata_area(16, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataRequest);
        let err = store.write_metadata_area(1, &[0; 65]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataRequest);
        let err = store.read_metadata_area(16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataRequest);
        store.close(true);

        let store = PageStore::open(&path).unwrap();
        assert_eq!(store.read_metadata_area(15).unwrap(), [7; METADATA_AREA_SIZE]);
        assert_eq!(&store.read_metadata_area(2).unwrap()[..3], b"abc");
        assert_eq!(store.page_count(), 0);
    }

    #[test]
    fn version_area_is_read_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = PageStore::open(&path).unwrap();
        let err = store.write_metadata_area(0, b"user data").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataRequest);
        store.close(true);

        let store = PageStore::open(&path).unwrap();
        assert_eq!(store.format_version(), FORMAT_VERSION);
    }

    #[test]
    fn failed_commit_can_be_retried() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = PageStore::open(&path).unwrap();
        fill(&store, 1, 0x11);
        store.write_metadata_area(2, b"staged").unwrap();

        // A directory in the way of the log.
        fs::create_dir(log_path(&path)).unwrap();
        let err = store.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LogCreate);
        assert_eq!(store.modified_pages(), 1);
        assert_eq!(store.outstanding_pages(), 0);
        assert_eq!(&store.read_metadata_area(2).unwrap()[..6], b"staged");

        fs::remove_dir(log_path(&path)).unwrap();
        store.commit().unwrap();
        assert_eq!(store.modified_pages(), 0);
        store.close(false);

        let store = PageStore::open(&path).unwrap();
        assert_eq!(read_byte(&store, 1), 0x11);
        assert_eq!(&store.read_metadata_area(2).unwrap()[..6], b"staged");
    }

    #[test]
    fn rollback_finishes_partly_applied_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = PageStore::open(&path).unwrap();
        fill(&store, 1, 0x11);
        fill(&store, 2, 0x11);
        store.commit().unwrap();
        fill(&store, 1, 0x22);
        fill(&store, 2, 0x22);
        {
            // The log is complete but only page 1 reached the file.
            let mut inner = store.inner.lock();
            store.write_log(&inner).unwrap();
            let page = inner.modified[&1].clone();
            let data = page.data.read();
            write_at(&mut inner.file, page_offset(1), data.as_ref()).unwrap();
            inner.log_pending = true;
        }
        assert!(log_path(&path).exists());

        store.rollback().unwrap();
        assert!(!log_path(&path).exists());
        assert_eq!(store.modified_pages(), 0);
        assert_eq!(read_byte(&store, 1), 0x22);
        assert_eq!(read_byte(&store, 2), 0x22);

        // Later commits start from a consistent file.
        fill(&store, 3, 0x33);
        store.commit().unwrap();
        store.close(false);
        let store = PageStore::open(&path).unwrap();
        assert_eq!(read_byte(&store, 1), 0x22);
        assert_eq!(read_byte(&store, 2), 0x22);
        assert_eq!(read_byte(&store, 3), 0x33);
    }

    #[test]
    fn unknown_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let mut region = vec![0u8; METADATA_SIZE];
        region[..4].copy_from_slice(&99u32.to_be_bytes());
        fs::write(&path, region).unwrap();
        let err = PageStore::open(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
    }

    #[test]
    fn partial_page_reads_as_zeros() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        PageStore::open(&path).unwrap().close(false);
        let mut data = fs::read(&path).unwrap();
        data.extend_from_slice(&[0xab; 200]);
        fs::write(&path, data).unwrap();

        let store = PageStore::open(&path).unwrap();
        assert_eq!(store.page_count(), 1);
        let page = store.acquire(0).unwrap();
        assert_eq!(page.read()[199], 0xab);
        assert_eq!(page.read()[200], 0);
    }

    #[test]
    fn free_space_map() {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("store.pdb")).unwrap();
        assert_eq!(store.free_space(1).unwrap(), 7616);
        store.set_free_space(1, 300).unwrap();
        assert_eq!(store.free_space(1).unwrap(), 258);
        assert_eq!(store.modified_pages(), 1);
        store.set_free_space(8193, 0).unwrap();
        assert_eq!(store.free_space(8193).unwrap(), 0);
        assert_eq!(store.modified_pages(), 2);
        assert_eq!(store.free_space(8192).unwrap(), 0);
        assert_eq!(store.outstanding_pages(), 0);
    }

    #[test]
    fn mark_dirty() {
        let dir = tempdir().unwrap();
        let store = PageStore::open(dir.path().join("store.pdb")).unwrap();
        assert!(!store.mark_dirty(3));
        let page = store.acquire(3).unwrap();
        assert!(store.mark_dirty(3));
        page.release();
        assert_eq!(store.modified_pages(), 1);
    }
}
