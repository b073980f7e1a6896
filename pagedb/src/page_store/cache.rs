use std::{collections::BTreeMap, sync::Arc};

use rustc_hash::FxHashMap;

use super::Page;

/// A least-recently-released cache of clean pages.
///
/// Only pages nobody holds and nobody modified live here, so evicting one
/// never loses data.
pub(super) struct PageCache {
    capacity: usize,
    tick: u64,
    pages: FxHashMap<u32, (Arc<Page>, u64)>,
    order: BTreeMap<u64, u32>,
}

impl PageCache {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            pages: FxHashMap::default(),
            order: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pages.len()
    }

    /// Removes a page from the cache and returns it.
    pub(super) fn take(&mut self, number: u32) -> Option<Arc<Page>> {
        let (page, tick) = self.pages.remove(&number)?;
        self.order.remove(&tick);
        Some(page)
    }

    /// Inserts a released page, returning the number of the page it evicts.
    pub(super) fn insert(&mut self, page: Arc<Page>) -> Option<u32> {
        if self.capacity == 0 {
            return None;
        }
        let number = page.number();
        self.take(number);
        self.tick += 1;
        self.order.insert(self.tick, number);
        self.pages.insert(number, (page, self.tick));
        if self.pages.len() <= self.capacity {
            return None;
        }
        let (_, victim) = self.order.pop_first()?;
        self.pages.remove(&victim);
        Some(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32) -> Arc<Page> {
        Arc::new(Page::zeroed(number))
    }

    #[test]
    fn evicts_least_recently_released() {
        let mut cache = PageCache::new(2);
        assert_eq!(cache.insert(page(1)), None);
        assert_eq!(cache.insert(page(2)), None);
        let one = cache.take(1).unwrap();
        assert_eq!(cache.insert(one), None);
        assert_eq!(cache.insert(page(3)), Some(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.take(2).is_none());
        assert_eq!(cache.take(1).unwrap().number(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_capacity() {
        let mut cache = PageCache::new(0);
        assert_eq!(cache.insert(page(1)), None);
        assert!(cache.take(1).is_none());
    }
}
