use std::fmt;

use super::{PageType, PAGE_SIZE, PAGE_TYPE, SPACE_CLASS_SIZES};
use crate::util::field::{Field, FieldArray};

/// Object page format {
///     type       : 1 byte
///     flags      : 1 byte
///     slot_count : 2 bytes
///     data_start : 2 bytes
///     reserved   : 2 bytes
///     slots      : slot_count * (offset: 2 bytes, length: 2 bytes)
///     free space
///     records    : packed toward the end of the page
/// }
///
/// record {
///     object_type : 1 byte
///     data        : length - 1 bytes
/// }
///
/// A free slot has offset 0. Records are kept contiguous, so removing one
/// compacts the data area without renumbering slots.
const SLOT_COUNT: Field = Field::new(2, 2);
const DATA_START: Field = Field::new(4, 2);
const HEADER_LEN: usize = 8;
const SLOT_LEN: usize = 4;
const MAX_SLOTS: usize = 1024;
const SLOTS: FieldArray = FieldArray::new(HEADER_LEN, SLOT_LEN, MAX_SLOTS);
const RECORD_HEADER_LEN: usize = 1;

/// The free bytes of an empty object page.
pub const OBJECT_PAGE_CAPACITY: usize = PAGE_SIZE - HEADER_LEN;

/// The largest object that fits on a page in the roomiest free-space class.
pub const MAX_OBJECT_SIZE: usize = SPACE_CLASS_SIZES[0] as usize - RECORD_HEADER_LEN - SLOT_LEN;

/// Returns the bytes an object of `len` bytes consumes on a page.
pub(crate) const fn object_footprint(len: usize) -> usize {
    RECORD_HEADER_LEN + len + SLOT_LEN
}

fn slot_offset(buf: &[u8], slot: usize) -> usize {
    SLOTS.field(slot).subfield(0, 2).get_u16(buf) as usize
}

fn slot_len(buf: &[u8], slot: usize) -> usize {
    SLOTS.field(slot).subfield(2, 2).get_u16(buf) as usize
}

/// An immutable view of an object page.
#[derive(Copy, Clone)]
pub struct ObjectPageRef<'a> {
    buf: &'a [u8],
}

impl<'a> ObjectPageRef<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        Self { buf }
    }

    pub fn slot_count(&self) -> usize {
        SLOT_COUNT.get_u16(self.buf) as usize
    }

    fn data_start(&self) -> usize {
        DATA_START.get_u16(self.buf) as usize
    }

    /// Returns the contiguous free bytes between the slots and the records.
    pub fn free_space(&self) -> usize {
        self.data_start() - (HEADER_LEN + self.slot_count() * SLOT_LEN)
    }

    /// Returns the largest object footprint the page can take.
    ///
    /// This is what the space map records, so it is zero once the slot
    /// directory is exhausted.
    pub fn available(&self) -> usize {
        if self.slot_count() < MAX_SLOTS || self.free_slot().is_some() {
            self.free_space()
        } else {
            0
        }
    }

    /// Returns the number of objects on the page.
    pub fn len(&self) -> usize {
        (0..self.slot_count())
            .filter(|&i| slot_offset(self.buf, i) != 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the type and data of the object in `slot`.
    pub fn get(&self, slot: u16) -> Option<(u8, &'a [u8])> {
        let slot = slot as usize;
        if slot >= self.slot_count() {
            return None;
        }
        let offset = slot_offset(self.buf, slot);
        if offset == 0 {
            return None;
        }
        let len = slot_len(self.buf, slot);
        let record = &self.buf[offset..offset + len];
        Some((record[0], &record[RECORD_HEADER_LEN..]))
    }

    fn free_slot(&self) -> Option<usize> {
        (0..self.slot_count()).find(|&i| slot_offset(self.buf, i) == 0)
    }

    /// Returns true if an object of `len` bytes fits on the page.
    pub fn fits(&self, len: usize) -> bool {
        let record = RECORD_HEADER_LEN + len;
        match self.free_slot() {
            Some(_) => record <= self.free_space(),
            None => self.slot_count() < MAX_SLOTS && record + SLOT_LEN <= self.free_space(),
        }
    }
}

impl fmt::Debug for ObjectPageRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPage")
            .field("slot_count", &self.slot_count())
            .field("free_space", &self.free_space())
            .finish()
    }
}

/// A mutable view of an object page.
pub struct ObjectPageMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> ObjectPageMut<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        Self { buf }
    }

    pub fn view(&self) -> ObjectPageRef<'_> {
        ObjectPageRef::new(&*self.buf)
    }

    /// Formats the page as an empty object page.
    pub fn init(&mut self) {
        self.buf.fill(0);
        PAGE_TYPE.put_u8(self.buf, PageType::Objects as u8);
        SLOT_COUNT.put_u16(self.buf, 0);
        DATA_START.put_u16(self.buf, PAGE_SIZE as u16);
    }

    /// Returns the page to the unallocated state.
    pub fn clear(&mut self) {
        self.buf.fill(0);
    }

    /// Inserts an object and returns its slot.
    ///
    /// Returns `None` if the object does not fit.
    pub fn insert(&mut self, object_type: u8, data: &[u8]) -> Option<u16> {
        let page = self.view();
        if !page.fits(data.len()) {
            return None;
        }
        let slot = match page.free_slot() {
            Some(slot) => slot,
            None => {
                let slot = page.slot_count();
                SLOTS.insert(self.buf, slot, slot);
                SLOT_COUNT.put_u16(self.buf, slot as u16 + 1);
                slot
            }
        };
        self.place(slot, object_type, data);
        Some(slot as u16)
    }

    /// Replaces the data of the object in `slot`, keeping its type.
    ///
    /// Returns false if the object does not exist or the new data does not
    /// fit on the page. The page is unchanged in that case.
    pub fn update(&mut self, slot: u16, data: &[u8]) -> bool {
        let page = self.view();
        let Some((object_type, old)) = page.get(slot) else {
            return false;
        };
        if old.len() == data.len() {
            let offset = slot_offset(self.buf, slot as usize) + RECORD_HEADER_LEN;
            self.buf[offset..offset + data.len()].copy_from_slice(data);
            return true;
        }
        if page.free_space() + old.len() < data.len() {
            return false;
        }
        self.cut(slot as usize);
        self.place(slot as usize, object_type, data);
        true
    }

    /// Removes the object in `slot`.
    ///
    /// Returns false if there is no such object.
    pub fn remove(&mut self, slot: u16) -> bool {
        if self.view().get(slot).is_none() {
            return false;
        }
        self.cut(slot as usize);
        // Trailing free slots are given back to the free space.
        let mut count = self.view().slot_count();
        while count > 0 && slot_offset(self.buf, count - 1) == 0 {
            count -= 1;
        }
        SLOT_COUNT.put_u16(self.buf, count as u16);
        true
    }

    /// Writes a record at the low end of the data area and points `slot` at
    /// it. The caller guarantees there is room.
    fn place(&mut self, slot: usize, object_type: u8, data: &[u8]) {
        let len = RECORD_HEADER_LEN + data.len();
        let offset = self.view().data_start() - len;
        self.buf[offset] = object_type;
        self.buf[offset + RECORD_HEADER_LEN..offset + len].copy_from_slice(data);
        let field = SLOTS.field(slot);
        field.subfield(0, 2).put_u16(self.buf, offset as u16);
        field.subfield(2, 2).put_u16(self.buf, len as u16);
        DATA_START.put_u16(self.buf, offset as u16);
    }

    /// Removes the record of `slot` and closes the gap it leaves.
    fn cut(&mut self, slot: usize) {
        let offset = slot_offset(self.buf, slot);
        let len = slot_len(self.buf, slot);
        let start = self.view().data_start();
        self.buf.copy_within(start..offset, start + len);
        self.buf[start..start + len].fill(0);
        for i in 0..self.view().slot_count() {
            let other = slot_offset(self.buf, i);
            if other != 0 && other < offset {
                SLOTS
                    .field(i)
                    .subfield(0, 2)
                    .put_u16(self.buf, (other + len) as u16);
            }
        }
        SLOTS.field(slot).bytes_mut(self.buf).fill(0);
        DATA_START.put_u16(self.buf, (start + len) as u16);
    }
}
