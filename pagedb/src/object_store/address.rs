use std::fmt;

use crate::page::PageKind;

/// The physical location of an object: a page and a slot on it.
///
/// Addresses change when an object moves to another page, so they are only
/// kept by structures that are updated along with the object.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectAddress {
    page: u32,
    slot: u16,
}

impl ObjectAddress {
    /// The encoded size of an address.
    pub const SIZE: usize = 6;

    /// An address that refers to no object. Page 0 is a space-map page, so
    /// it never holds objects.
    pub const NULL: ObjectAddress = ObjectAddress { page: 0, slot: 0 };

    pub const fn new(page: u32, slot: u16) -> Self {
        Self { page, slot }
    }

    pub const fn page(&self) -> u32 {
        self.page
    }

    pub const fn slot(&self) -> u16 {
        self.slot
    }

    /// Returns true if the address may refer to an object.
    pub const fn is_valid(&self) -> bool {
        PageKind::of(self.page).is_object()
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[..4].copy_from_slice(&self.page.to_be_bytes());
        bytes[4..].copy_from_slice(&self.slot.to_be_bytes());
        bytes
    }

    /// Decodes an address, returning `None` unless `bytes` is exactly
    /// [`ObjectAddress::SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        let page = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let slot = u16::from_be_bytes([bytes[4], bytes[5]]);
        Some(Self { page, slot })
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding() {
        let addr = ObjectAddress::new(0x0102_0304, 0x0506);
        assert_eq!(addr.to_bytes(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(ObjectAddress::from_bytes(&addr.to_bytes()), Some(addr));
        assert_eq!(ObjectAddress::from_bytes(&[1, 2, 3]), None);
        assert_eq!(addr.to_string(), "16909060:1286");
    }

    #[test]
    fn validity() {
        assert!(!ObjectAddress::NULL.is_valid());
        assert!(ObjectAddress::new(1, 0).is_valid());
        assert!(!ObjectAddress::new(8192, 3).is_valid());
    }
}
