//! Page layouts and the page policy.
//!
//! The page number space is split into groups of [`SPACE_MAP_INTERVAL`]
//! pages. The first page of each group is a space-map page describing the
//! free space of the others; every other page is an object-area page whose
//! first byte tells what it holds:
//!
//! ```text
//! object-area page {
//!     type    : 1 byte (0 = unallocated, 1 = objects, 2 = index node)
//!     content : PAGE_SIZE - 1 bytes
//! }
//! ```

use crate::util::field::Field;

mod space_map;
pub use space_map::{
    class_of, free_space_of_class, SpaceMapMut, SpaceMapRef, SPACE_CLASS_SIZES,
};

mod object_page;
pub(crate) use object_page::object_footprint;
pub use object_page::{ObjectPageMut, ObjectPageRef, MAX_OBJECT_SIZE, OBJECT_PAGE_CAPACITY};

/// The size of a page in bytes.
pub const PAGE_SIZE: usize = 8192;

/// Every page whose number is a multiple of this is a space-map page.
pub const SPACE_MAP_INTERVAL: u32 = 8192;

pub(crate) const PAGE_TYPE: Field = Field::new(0, 1);

/// The kind of a page, decided by its number alone.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageKind {
    /// A page holding one free-space class byte per following page.
    SpaceMap,
    /// A page in the object area.
    Object,
}

impl PageKind {
    /// Returns the kind of the page with the given number.
    pub const fn of(number: u32) -> Self {
        if number % SPACE_MAP_INTERVAL == 0 {
            Self::SpaceMap
        } else {
            Self::Object
        }
    }

    pub const fn is_space_map(&self) -> bool {
        matches!(self, Self::SpaceMap)
    }

    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Object)
    }
}

/// Returns the number of the space-map page that describes `number`.
pub const fn space_map_page_of(number: u32) -> u32 {
    number - number % SPACE_MAP_INTERVAL
}

/// The type byte of an object-area page.
///
/// These values are persisted to disk, don't change them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum PageType {
    Unallocated = 0,
    Objects = 1,
    IndexNode = 2,
}

impl PageType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unallocated),
            1 => Some(Self::Objects),
            2 => Some(Self::IndexNode),
            _ => None,
        }
    }

    /// Reads the type byte of an object-area page.
    pub fn of(buf: &[u8]) -> Option<Self> {
        Self::from_u8(PAGE_TYPE.get_u8(buf))
    }
}

/// The structured content of an object-area page.
#[derive(Debug)]
pub enum ObjectPageContent<'a> {
    Unallocated,
    Objects(ObjectPageRef<'a>),
    IndexNode(&'a [u8]),
}

impl<'a> ObjectPageContent<'a> {
    /// Interprets the bytes of an object-area page.
    ///
    /// Returns `None` if the page type byte is unknown.
    pub fn materialize(buf: &'a [u8]) -> Option<Self> {
        let content = match PageType::of(buf)? {
            PageType::Unallocated => Self::Unallocated,
            PageType::Objects => Self::Objects(ObjectPageRef::new(buf)),
            PageType::IndexNode => Self::IndexNode(buf),
        };
        Some(content)
    }
}
