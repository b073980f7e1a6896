//! The metadata region at the head of a store file.
//!
//! ```text
//! file {
//!     metadata : 16 areas * 64 bytes
//!     pages    : num_pages * PAGE_SIZE
//! }
//! ```
//!
//! The first four bytes of area 0 hold the format version. A zero version
//! marks a file that has never been opened.

use super::{Error, ErrorKind, Result};
use crate::{
    page::PAGE_SIZE,
    util::field::{Buffer, Field, FieldArray},
};

/// The number of metadata areas.
pub const METADATA_AREAS: usize = 16;

/// The size of each metadata area.
pub const METADATA_AREA_SIZE: usize = 64;

pub(crate) const METADATA_SIZE: usize = METADATA_AREAS * METADATA_AREA_SIZE;

/// The format version written by this engine.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// The metadata area that holds the format version.
pub(crate) const VERSION_AREA: usize = 0;

const AREAS: FieldArray = FieldArray::new(0, METADATA_AREA_SIZE, METADATA_AREAS);
const VERSION: Field = Field::new(0, 4);

/// Returns the file offset of a page.
pub(crate) const fn page_offset(number: u32) -> u64 {
    METADATA_SIZE as u64 + number as u64 * PAGE_SIZE as u64
}

/// Returns the number of pages a file of `len` bytes holds.
///
/// A trailing partial page counts as a page.
pub(crate) const fn page_count(len: u64) -> u32 {
    if len <= METADATA_SIZE as u64 {
        return 0;
    }
    let area = len - METADATA_SIZE as u64;
    ((area + PAGE_SIZE as u64 - 1) / PAGE_SIZE as u64) as u32
}

/// Validates an area request.
pub(crate) fn check_area(i: usize, len: usize) -> Result<()> {
    if i >= METADATA_AREAS || len > METADATA_AREA_SIZE {
        return Err(Error::with_source(
            ErrorKind::MetadataRequest,
            format!("area {i} with {len} bytes"),
        ));
    }
    Ok(())
}

/// An in-memory copy of the metadata region.
#[derive(Clone, Debug)]
pub(crate) struct Metadata(Buffer);

impl Metadata {
    pub(crate) fn new() -> Self {
        Self(Buffer::new(METADATA_SIZE))
    }

    pub(crate) fn from_slice(data: &[u8]) -> Self {
        let mut meta = Self::new();
        let n = data.len().min(METADATA_SIZE);
        meta.0.as_mut()[..n].copy_from_slice(&data[..n]);
        meta
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub(crate) fn version(&self) -> u32 {
        VERSION.get_u32(self.0.as_ref())
    }

    pub(crate) fn set_version(&mut self, version: u32) {
        VERSION.put_u32(self.0.as_mut(), version)
    }

    pub(crate) fn area(&self, i: usize) -> [u8; METADATA_AREA_SIZE] {
        let mut area = [0; METADATA_AREA_SIZE];
        area.copy_from_slice(AREAS.field(i).get_bytes(self.0.as_ref()));
        area
    }

    pub(crate) fn set_area(&mut self, i: usize, data: &[u8]) {
        AREAS.field(i).put_bytes(self.0.as_mut(), data)
    }

    /// Returns the file offset of an area.
    pub(crate) fn area_offset(i: usize) -> u64 {
        AREAS.field(i).offset() as u64
    }
}
