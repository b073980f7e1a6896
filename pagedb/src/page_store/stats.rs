use crate::util::atomic::Counter;

/// Statistics of a page store.
#[derive(Default, Clone, Debug, Eq, PartialEq)]
pub struct PageStoreStats {
    /// Pages read from the store file.
    pub page_reads: u64,
    /// Pages written to their home offsets.
    pub page_writes: u64,
    /// Acquisitions served by the clean page cache.
    pub cache_hits: u64,
    /// Acquisitions that had to read the store file.
    pub cache_misses: u64,
    /// Commits that wrote at least one change.
    pub commits: u64,
    /// Records written to the log.
    pub log_records: u64,
    /// Pages replayed from a log when the store was opened.
    pub recovered_pages: u64,
}

impl PageStoreStats {
    pub fn sub(&self, o: &PageStoreStats) -> PageStoreStats {
        PageStoreStats {
            page_reads: self.page_reads - o.page_reads,
            page_writes: self.page_writes - o.page_writes,
            cache_hits: self.cache_hits - o.cache_hits,
            cache_misses: self.cache_misses - o.cache_misses,
            commits: self.commits - o.commits,
            log_records: self.log_records - o.log_records,
            recovered_pages: self.recovered_pages - o.recovered_pages,
        }
    }
}

#[derive(Default)]
pub(super) struct AtomicPageStoreStats {
    pub(super) page_reads: Counter,
    pub(super) page_writes: Counter,
    pub(super) cache_hits: Counter,
    pub(super) cache_misses: Counter,
    pub(super) commits: Counter,
    pub(super) log_records: Counter,
    pub(super) recovered_pages: Counter,
}

impl AtomicPageStoreStats {
    pub(super) fn snapshot(&self) -> PageStoreStats {
        PageStoreStats {
            page_reads: self.page_reads.get(),
            page_writes: self.page_writes.get(),
            cache_hits: self.cache_hits.get(),
            cache_misses: self.cache_misses.get(),
            commits: self.commits.get(),
            log_records: self.log_records.get(),
            recovered_pages: self.recovered_pages.get(),
        }
    }
}
