use super::{PageKind, SPACE_MAP_INTERVAL};

/// The guaranteed free bytes of each free-space class.
///
/// Class 0 is the roomiest. These values are persisted to disk, don't
/// change them.
pub const SPACE_CLASS_SIZES: [u16; 16] = [
    7616, 6906, 6196, 5486, 4776, 4066, 3356, 2646, 1936, 1226, 516, 258, 129, 64, 32, 0,
];

/// Returns the class that guarantees the most space without overstating
/// `free_bytes`.
pub fn class_of(free_bytes: usize) -> u8 {
    SPACE_CLASS_SIZES
        .iter()
        .position(|&size| size as usize <= free_bytes)
        .unwrap_or(SPACE_CLASS_SIZES.len() - 1) as u8
}

/// Returns the guaranteed free bytes of a class.
pub fn free_space_of_class(class: u8) -> usize {
    SPACE_CLASS_SIZES[(class & 0x0f) as usize] as usize
}

/// An immutable view of a space-map page.
///
/// Byte `k` (1 <= k < 8192) holds the class of page `number + k`.
#[derive(Copy, Clone, Debug)]
pub struct SpaceMapRef<'a> {
    number: u32,
    buf: &'a [u8],
}

impl<'a> SpaceMapRef<'a> {
    /// # Panics
    ///
    /// Panics if `number` is not a space-map page number.
    pub fn new(number: u32, buf: &'a [u8]) -> Self {
        assert!(PageKind::of(number).is_space_map());
        Self { number, buf }
    }

    /// Returns the number of the first page described by this map.
    pub fn first_page(&self) -> u32 {
        self.number + 1
    }

    /// Returns the number of the last page described by this map.
    pub fn last_page(&self) -> u32 {
        self.number + SPACE_MAP_INTERVAL - 1
    }

    fn slot(&self, page: u32) -> Option<usize> {
        if page > self.number && page <= self.last_page() {
            Some((page - self.number) as usize)
        } else {
            None
        }
    }

    /// Returns the class recorded for `page`, if this map covers it.
    pub fn class(&self, page: u32) -> Option<u8> {
        self.slot(page).map(|i| self.buf[i])
    }

    /// Returns the guaranteed free bytes of `page`.
    ///
    /// Pages outside the map read as full.
    pub fn free_space(&self, page: u32) -> usize {
        self.class(page).map(free_space_of_class).unwrap_or(0)
    }

    /// Returns the first page in `from..=to` whose class guarantees at least
    /// `min_free` bytes.
    pub fn find(&self, from: u32, to: u32, min_free: usize) -> Option<u32> {
        let from = from.max(self.first_page());
        let to = to.min(self.last_page());
        (from..=to).find(|&page| self.free_space(page) >= min_free)
    }
}

/// A mutable view of a space-map page.
#[derive(Debug)]
pub struct SpaceMapMut<'a> {
    number: u32,
    buf: &'a mut [u8],
}

impl<'a> SpaceMapMut<'a> {
    pub fn new(number: u32, buf: &'a mut [u8]) -> Self {
        assert!(PageKind::of(number).is_space_map());
        Self { number, buf }
    }

    pub fn view(&self) -> SpaceMapRef<'_> {
        SpaceMapRef::new(self.number, &*self.buf)
    }

    /// Records the free bytes of `page`.
    ///
    /// Returns true if the stored class changed. Pages outside the map are
    /// ignored.
    pub fn set_free_space(&mut self, page: u32, free_bytes: usize) -> bool {
        let Some(i) = self.view().slot(page) else {
            return false;
        };
        let class = class_of(free_bytes);
        if self.buf[i] == class {
            return false;
        }
        self.buf[i] = class;
        true
    }
}
