use std::fmt;

/// The external handle of a stored object.
///
/// Identifiers are minted from a monotonically increasing sequence when an
/// object is created and are never reused, so they stay valid while the
/// object moves between pages.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId(i64);

impl ObjectId {
    /// The encoded size of an identifier.
    pub const SIZE: usize = 8;

    /// The identifier that never refers to an object.
    pub const INVALID: ObjectId = ObjectId(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Returns true if the identifier can refer to an object.
    pub const fn is_valid(&self) -> bool {
        self.0 > 0
    }

    /// Encodes the identifier.
    ///
    /// The encoding is big-endian, so the byte order of valid identifiers
    /// matches their numeric order.
    pub const fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.0.to_be_bytes()
    }

    /// Decodes an identifier, returning `None` unless `bytes` is exactly
    /// [`ObjectId::SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::SIZE] = bytes.try_into().ok()?;
        Some(Self(i64::from_be_bytes(bytes)))
    }
}

impl From<i64> for ObjectId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}
