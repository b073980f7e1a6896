//! Typed windows over byte buffers.
//!
//! Every structure the store persists is described as a set of [`Field`]s
//! and [`FieldArray`]s at fixed offsets of a page buffer. The descriptors
//! are plain values, so layouts can be declared as constants and applied to
//! any buffer without copying it. [`Pointer`] and [`PointerMut`] walk a
//! buffer sequentially instead.
//!
//! All integers are encoded big-endian. Accesses outside the buffer are
//! programming errors and panic.

use std::{fmt, mem};

/// A window of `len` bytes starting at `offset`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Field {
    offset: usize,
    len: usize,
}

impl Field {
    /// Creates a field descriptor.
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Returns the offset of the field.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the length of the field.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the field covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the offset just past the end of the field.
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Returns a field nested inside this one.
    ///
    /// # Panics
    ///
    /// Panics if the nested field extends past this one.
    pub fn subfield(&self, offset: usize, len: usize) -> Field {
        assert!(offset + len <= self.len, "subfield out of range");
        Field::new(self.offset + offset, len)
    }

    /// Returns the field that immediately follows this one.
    pub const fn next(&self, len: usize) -> Field {
        Field::new(self.end(), len)
    }

    /// Returns the bytes covered by the field.
    pub fn get_bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.offset..self.end()]
    }

    /// Returns the bytes covered by the field for writing.
    pub fn bytes_mut<'a>(&self, buf: &'a mut [u8]) -> &'a mut [u8] {
        &mut buf[self.offset..self.end()]
    }

    /// Copies `value` into the field.
    ///
    /// A shorter value is zero-padded and a longer one is truncated to the
    /// field length.
    pub fn put_bytes(&self, buf: &mut [u8], value: &[u8]) {
        let dst = self.bytes_mut(buf);
        let n = value.len().min(dst.len());
        dst[..n].copy_from_slice(&value[..n]);
        dst[n..].fill(0);
    }

    /// Reads the field as an unsigned integer.
    ///
    /// # Panics
    ///
    /// Panics if the field is wider than 8 bytes.
    pub fn get_uint(&self, buf: &[u8]) -> u64 {
        assert!(self.len <= mem::size_of::<u64>());
        self.get_bytes(buf)
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    /// Writes an unsigned integer into the field, keeping the low-order
    /// bytes that fit.
    pub fn put_uint(&self, buf: &mut [u8], value: u64) {
        assert!(self.len <= mem::size_of::<u64>());
        let bytes = value.to_be_bytes();
        self.bytes_mut(buf)
            .copy_from_slice(&bytes[bytes.len() - self.len..]);
    }

    /// Reads the field as a sign-extended integer.
    pub fn get_int(&self, buf: &[u8]) -> i64 {
        if self.len == 0 {
            return 0;
        }
        let shift = 64 - 8 * self.len as u32;
        ((self.get_uint(buf) << shift) as i64) >> shift
    }

    /// Writes a signed integer into the field.
    pub fn put_int(&self, buf: &mut [u8], value: i64) {
        self.put_uint(buf, value as u64)
    }

    pub fn get_u8(&self, buf: &[u8]) -> u8 {
        debug_assert_eq!(self.len, 1);
        buf[self.offset]
    }

    pub fn put_u8(&self, buf: &mut [u8], value: u8) {
        debug_assert_eq!(self.len, 1);
        buf[self.offset] = value;
    }

    pub fn get_u16(&self, buf: &[u8]) -> u16 {
        debug_assert_eq!(self.len, 2);
        self.get_uint(buf) as u16
    }

    pub fn put_u16(&self, buf: &mut [u8], value: u16) {
        debug_assert_eq!(self.len, 2);
        self.put_uint(buf, value as u64)
    }

    pub fn get_u32(&self, buf: &[u8]) -> u32 {
        debug_assert_eq!(self.len, 4);
        self.get_uint(buf) as u32
    }

    pub fn put_u32(&self, buf: &mut [u8], value: u32) {
        debug_assert_eq!(self.len, 4);
        self.put_uint(buf, value as u64)
    }

    pub fn get_u64(&self, buf: &[u8]) -> u64 {
        debug_assert_eq!(self.len, 8);
        self.get_uint(buf)
    }

    pub fn put_u64(&self, buf: &mut [u8], value: u64) {
        debug_assert_eq!(self.len, 8);
        self.put_uint(buf, value)
    }
}

/// A sequence of `count` equally sized fields.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FieldArray {
    offset: usize,
    stride: usize,
    count: usize,
}

impl FieldArray {
    pub const fn new(offset: usize, stride: usize, count: usize) -> Self {
        Self {
            offset,
            stride,
            count,
        }
    }

    /// Returns the capacity of the array.
    pub const fn count(&self) -> usize {
        self.count
    }

    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Returns the field of the `i`th element.
    ///
    /// # Panics
    ///
    /// Panics if `i` is not less than the array capacity.
    pub fn field(&self, i: usize) -> Field {
        assert!(i < self.count, "element {i} out of range {}", self.count);
        Field::new(self.offset + i * self.stride, self.stride)
    }

    /// Opens a hole at element `i` by shifting elements `i..used` one slot
    /// to the right. The hole is zero-filled.
    pub fn insert(&self, buf: &mut [u8], i: usize, used: usize) -> Field {
        assert!(i <= used && used < self.count);
        let start = self.offset + i * self.stride;
        let end = self.offset + used * self.stride;
        buf.copy_within(start..end, start + self.stride);
        let field = self.field(i);
        field.bytes_mut(buf).fill(0);
        field
    }

    /// Removes element `i` by shifting elements `i + 1..used` one slot to
    /// the left. The freed last slot is zero-filled.
    pub fn remove(&self, buf: &mut [u8], i: usize, used: usize) {
        assert!(i < used && used <= self.count);
        let start = self.offset + (i + 1) * self.stride;
        let end = self.offset + used * self.stride;
        buf.copy_within(start..end, start - self.stride);
        self.field(used - 1).bytes_mut(buf).fill(0);
    }
}

macro_rules! get_int {
    ($name:ident, $t:ty) => {
        pub fn $name(&mut self) -> $t {
            let mut bytes = [0u8; mem::size_of::<$t>()];
            bytes.copy_from_slice(self.get_slice(mem::size_of::<$t>()));
            <$t>::from_be_bytes(bytes)
        }
    };
}

/// A cursor that reads consecutive values from a buffer.
#[derive(Clone)]
pub struct Pointer<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Pointer<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Creates a pointer positioned at `pos`.
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        assert!(pos <= buf.len());
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn skip(&mut self, n: usize) {
        assert!(n <= self.remaining());
        self.pos += n;
    }

    /// Returns the field of `len` bytes at the current position and moves
    /// past it.
    pub fn field(&mut self, len: usize) -> Field {
        let field = Field::new(self.pos, len);
        self.skip(len);
        field
    }

    get_int!(get_u8, u8);
    get_int!(get_u16, u16);
    get_int!(get_u32, u32);
    get_int!(get_u64, u64);
    get_int!(get_i64, i64);

    pub fn get_slice(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    pub fn get_length_prefixed_slice(&mut self) -> &'a [u8] {
        let len = self.get_u16() as usize;
        self.get_slice(len)
    }
}

impl fmt::Debug for Pointer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointer")
            .field("len", &self.buf.len())
            .field("pos", &self.pos)
            .finish()
    }
}

macro_rules! put_int {
    ($name:ident, $t:ty) => {
        pub fn $name(&mut self, v: $t) {
            self.put_slice(&v.to_be_bytes());
        }
    };
}

/// A cursor that writes consecutive values into a buffer.
pub struct PointerMut<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> PointerMut<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a mut [u8], pos: usize) -> Self {
        assert!(pos <= buf.len());
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn skip(&mut self, n: usize) {
        assert!(n <= self.remaining());
        self.pos += n;
    }

    put_int!(put_u8, u8);
    put_int!(put_u16, u16);
    put_int!(put_u32, u32);
    put_int!(put_u64, u64);
    put_int!(put_i64, i64);

    pub fn put_slice(&mut self, slice: &[u8]) {
        self.buf[self.pos..self.pos + slice.len()].copy_from_slice(slice);
        self.pos += slice.len();
    }

    pub fn put_length_prefixed_slice(&mut self, slice: &[u8]) {
        assert!(slice.len() <= u16::MAX as usize);
        self.put_u16(slice.len() as u16);
        self.put_slice(slice);
    }

    pub const fn length_prefixed_slice_size(slice: &[u8]) -> usize {
        mem::size_of::<u16>() + slice.len()
    }
}

/// An owned, zero-initialized buffer of fixed size.
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer(Box<[u8]>);

impl Buffer {
    pub fn new(size: usize) -> Self {
        Self(vec![0; size].into_boxed_slice())
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self(data.to_vec().into_boxed_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replaces the content with `data`.
    ///
    /// # Panics
    ///
    /// Panics if the lengths differ.
    pub fn copy_from(&mut self, data: &[u8]) {
        self.0.copy_from_slice(data);
    }

    pub fn clear(&mut self) {
        self.0.fill(0);
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for Buffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("len", &self.0.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    const SIZE: usize = 8192;

    #[test]
    fn uint_fields() {
        let mut buf = Buffer::new(16);
        let a = Field::new(0, 2);
        let b = a.next(3);
        let c = b.next(8);
        a.put_u16(buf.as_mut(), 0xbeef);
        b.put_uint(buf.as_mut(), 0x01_0203);
        c.put_u64(buf.as_mut(), u64::MAX - 1);
        assert_eq!(a.get_u16(buf.as_ref()), 0xbeef);
        assert_eq!(b.get_uint(buf.as_ref()), 0x01_0203);
        assert_eq!(c.get_u64(buf.as_ref()), u64::MAX - 1);
        assert_eq!(&buf.as_ref()[..2], &[0xbe, 0xef]);
        // Values wider than the field keep their low-order bytes.
        a.put_uint(buf.as_mut(), 0x12_3456);
        assert_eq!(a.get_u16(buf.as_ref()), 0x3456);
    }

    #[test]
    fn int_fields_sign_extend() {
        let mut buf = Buffer::new(8);
        let f = Field::new(1, 3);
        f.put_int(buf.as_mut(), -2);
        assert_eq!(f.get_int(buf.as_ref()), -2);
        assert_eq!(f.get_uint(buf.as_ref()), 0xff_fffe);
        f.put_int(buf.as_mut(), 1000);
        assert_eq!(f.get_int(buf.as_ref()), 1000);
        assert_eq!(buf.as_ref()[0], 0);
        assert_eq!(buf.as_ref()[4], 0);
    }

    #[test]
    fn bytes_pad_and_truncate() {
        let mut buf = Buffer::new(8);
        let f = Field::new(2, 4);
        f.put_bytes(buf.as_mut(), b"abcdef");
        assert_eq!(f.get_bytes(buf.as_ref()), b"abcd");
        f.put_bytes(buf.as_mut(), b"x");
        assert_eq!(f.get_bytes(buf.as_ref()), b"x\0\0\0");
        assert_eq!(f.subfield(1, 2), Field::new(3, 2));
    }

    #[test]
    fn overlapping_fields_last_write_wins() {
        let mut buf = Buffer::new(8);
        let wide = Field::new(0, 4);
        let narrow = Field::new(2, 2);
        wide.put_u32(buf.as_mut(), 0x1122_3344);
        narrow.put_u16(buf.as_mut(), 0xaabb);
        assert_eq!(wide.get_u32(buf.as_ref()), 0x1122_aabb);
        wide.put_u32(buf.as_mut(), 0x5566_7788);
        assert_eq!(narrow.get_u16(buf.as_ref()), 0x7788);
    }

    #[test]
    fn field_array_shift() {
        let mut buf = Buffer::new(12);
        let array = FieldArray::new(2, 2, 5);
        for i in 0..3 {
            array.field(i).put_u16(buf.as_mut(), i as u16 + 1);
        }
        let hole = array.insert(buf.as_mut(), 1, 3);
        hole.put_u16(buf.as_mut(), 9);
        let values: Vec<u16> = (0..4)
            .map(|i| array.field(i).get_u16(buf.as_ref()))
            .collect();
        assert_eq!(values, vec![1, 9, 2, 3]);
        array.remove(buf.as_mut(), 0, 4);
        let values: Vec<u16> = (0..4)
            .map(|i| array.field(i).get_u16(buf.as_ref()))
            .collect();
        assert_eq!(values, vec![9, 2, 3, 0]);
    }

    #[test]
    #[should_panic]
    fn out_of_range_panics() {
        let buf = Buffer::new(4);
        Field::new(2, 4).get_u32(buf.as_ref());
    }

    #[test]
    fn pointers() {
        let mut buf = Buffer::new(32);
        let mut w = PointerMut::new(buf.as_mut());
        w.put_u8(7);
        w.put_u32(0xdead_beef);
        w.put_length_prefixed_slice(b"key");
        w.put_i64(-5);
        let end = w.position();
        assert_eq!(end, 1 + 4 + 2 + 3 + 8);

        let mut r = Pointer::new(buf.as_ref());
        assert_eq!(r.get_u8(), 7);
        assert_eq!(r.get_u32(), 0xdead_beef);
        assert_eq!(r.get_length_prefixed_slice(), b"key");
        assert_eq!(r.get_i64(), -5);
        assert_eq!(r.position(), end);
        assert_eq!(r.remaining(), 32 - end);
    }

    quickcheck! {
        fn bytes_round_trip(offset: u16, data: Vec<u8>) -> bool {
            let offset = offset as usize % SIZE;
            let len = data.len().min(SIZE - offset);
            let mut buf = Buffer::new(SIZE);
            let field = Field::new(offset, len);
            field.put_bytes(buf.as_mut(), &data[..len]);
            field.get_bytes(buf.as_ref()) == &data[..len]
        }

        fn uint_round_trip(offset: u16, width: u8, value: u64) -> bool {
            let width = (width % 8 + 1) as usize;
            let offset = offset as usize % (SIZE - width);
            let mut buf = Buffer::new(SIZE);
            let field = Field::new(offset, width);
            field.put_uint(buf.as_mut(), value);
            let mask = if width == 8 { u64::MAX } else { (1u64 << (8 * width)) - 1 };
            field.get_uint(buf.as_ref()) == value & mask
        }
    }
}
