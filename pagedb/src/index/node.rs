use std::fmt;

use bitflags::bitflags;

use crate::{
    page::{PageType, PAGE_SIZE, PAGE_TYPE},
    util::field::{Field, FieldArray, Pointer, PointerMut},
};

/// The longest key an index accepts.
pub const MAX_KEY_LEN: usize = 1024;

/// The longest value an index accepts.
pub const MAX_VALUE_LEN: usize = 2048;

bitflags! {
    struct NodeFlags: u8 {
        const LEAF = 0b0000_0001;
    }
}

/// Index node format {
///     type       : 1 byte
///     flags      : 1 byte
///     count      : 2 bytes
///     data_start : 2 bytes
///     reserved   : 2 bytes
///     link       : 4 bytes
///     reserved   : 4 bytes
///     slots      : count * 2 bytes (entry offsets in key order)
///     free space
///     entries    : packed toward the end of the page
/// }
///
/// entry {
///     key_len   : 2 bytes
///     value_len : 2 bytes
///     key       : key_len bytes
///     value     : value_len bytes
/// }
///
/// The link of a leaf is the next leaf, or 0 for the last one. The link of
/// an internal node is its leftmost child, and the value of each internal
/// entry is the child holding keys from that entry's key on.
const FLAGS: Field = Field::new(1, 1);
const COUNT: Field = Field::new(2, 2);
const DATA_START: Field = Field::new(4, 2);
const LINK: Field = Field::new(8, 4);
const HEADER_LEN: usize = 16;
const SLOT_LEN: usize = 2;
const SLOTS: FieldArray = FieldArray::new(HEADER_LEN, SLOT_LEN, (PAGE_SIZE - HEADER_LEN) / SLOT_LEN);
const ENTRY_HEADER_LEN: usize = 4;
const CHILD: Field = Field::new(0, 4);

/// The room of an empty node.
pub(crate) const NODE_CAPACITY: usize = PAGE_SIZE - HEADER_LEN;

/// Returns the bytes an entry consumes on a node, including its slot.
pub(crate) const fn entry_size(key_len: usize, value_len: usize) -> usize {
    SLOT_LEN + ENTRY_HEADER_LEN + key_len + value_len
}

pub(crate) fn encode_child(number: u32) -> [u8; 4] {
    number.to_be_bytes()
}

/// Returns true if the page holds an index node.
pub(crate) fn is_node(buf: &[u8]) -> bool {
    PageType::of(buf) == Some(PageType::IndexNode)
}

#[derive(Copy, Clone)]
pub(crate) struct NodeRef<'a> {
    buf: &'a [u8],
}

impl<'a> NodeRef<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        debug_assert!(is_node(buf));
        Self { buf }
    }

    fn flags(&self) -> NodeFlags {
        NodeFlags::from_bits_truncate(FLAGS.get_u8(self.buf))
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.flags().contains(NodeFlags::LEAF)
    }

    pub(crate) fn len(&self) -> usize {
        COUNT.get_u16(self.buf) as usize
    }

    pub(crate) fn link(&self) -> u32 {
        LINK.get_u32(self.buf)
    }

    fn data_start(&self) -> usize {
        DATA_START.get_u16(self.buf) as usize
    }

    pub(crate) fn free_space(&self) -> usize {
        self.data_start() - (HEADER_LEN + self.len() * SLOT_LEN)
    }

    fn offset(&self, i: usize) -> usize {
        SLOTS.field(i).get_u16(self.buf) as usize
    }

    /// Returns the key and value of the `i`th entry.
    pub(crate) fn entry(&self, i: usize) -> (&'a [u8], &'a [u8]) {
        let mut r = Pointer::at(self.buf, self.offset(i));
        let key_len = r.get_u16() as usize;
        let value_len = r.get_u16() as usize;
        (r.get_slice(key_len), r.get_slice(value_len))
    }

    pub(crate) fn key(&self, i: usize) -> &'a [u8] {
        self.entry(i).0
    }

    /// Returns the child page of the `i`th entry of an internal node.
    pub(crate) fn child(&self, i: usize) -> u32 {
        CHILD.get_u32(self.entry(i).1)
    }

    /// Returns the index of the first entry whose key is not less than
    /// `key`.
    pub(crate) fn lower_bound(&self, key: &[u8]) -> usize {
        self.partition(|k| k < key)
    }

    /// Returns the index of the first entry whose key is greater than
    /// `key`.
    pub(crate) fn upper_bound(&self, key: &[u8]) -> usize {
        self.partition(|k| k <= key)
    }

    fn partition<F: Fn(&[u8]) -> bool>(&self, pred: F) -> usize {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if pred(self.key(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Returns the child of an internal node that covers `key`.
    ///
    /// With `after_equal`, the child is the last one that may hold `key`,
    /// which is where a new entry goes. Otherwise it is the first one,
    /// where a search for `key` starts.
    pub(crate) fn child_for(&self, key: &[u8], after_equal: bool) -> u32 {
        let i = if after_equal {
            self.upper_bound(key)
        } else {
            self.lower_bound(key)
        };
        if i == 0 {
            self.link()
        } else {
            self.child(i - 1)
        }
    }

    /// Returns the child pages of an internal node, leftmost first.
    pub(crate) fn children(&self) -> Vec<u32> {
        let mut children = vec![self.link()];
        children.extend((0..self.len()).map(|i| self.child(i)));
        children
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + '_ {
        (0..self.len()).map(|i| self.entry(i))
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("leaf", &self.is_leaf())
            .field("len", &self.len())
            .field("link", &self.link())
            .field("free_space", &self.free_space())
            .finish()
    }
}

pub(crate) struct NodeMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> NodeMut<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn view(&self) -> NodeRef<'_> {
        NodeRef::new(&*self.buf)
    }

    /// Formats the page as an empty node.
    pub(crate) fn init(&mut self, leaf: bool, link: u32) {
        self.buf.fill(0);
        PAGE_TYPE.put_u8(self.buf, PageType::IndexNode as u8);
        let flags = if leaf {
            NodeFlags::LEAF
        } else {
            NodeFlags::empty()
        };
        FLAGS.put_u8(self.buf, flags.bits());
        DATA_START.put_u16(self.buf, PAGE_SIZE as u16);
        LINK.put_u32(self.buf, link);
    }

    /// Inserts an entry at index `i`.
    ///
    /// Returns false if the node has no room for it.
    pub(crate) fn insert(&mut self, i: usize, key: &[u8], value: &[u8]) -> bool {
        let node = self.view();
        let count = node.len();
        if node.free_space() < entry_size(key.len(), value.len()) {
            return false;
        }
        let len = ENTRY_HEADER_LEN + key.len() + value.len();
        let offset = node.data_start() - len;
        let mut w = PointerMut::at(self.buf, offset);
        w.put_u16(key.len() as u16);
        w.put_u16(value.len() as u16);
        w.put_slice(key);
        w.put_slice(value);
        SLOTS.insert(self.buf, i, count).put_u16(self.buf, offset as u16);
        COUNT.put_u16(self.buf, count as u16 + 1);
        DATA_START.put_u16(self.buf, offset as u16);
        true
    }

    /// Removes the entry at index `i` and compacts the entry area.
    pub(crate) fn remove(&mut self, i: usize) {
        let node = self.view();
        let count = node.len();
        let offset = node.offset(i);
        let (key, value) = node.entry(i);
        let len = ENTRY_HEADER_LEN + key.len() + value.len();
        let start = node.data_start();
        self.buf.copy_within(start..offset, start + len);
        self.buf[start..start + len].fill(0);
        for j in 0..count {
            let other = self.view().offset(j);
            if other < offset {
                SLOTS.field(j).put_u16(self.buf, (other + len) as u16);
            }
        }
        SLOTS.remove(self.buf, i, count);
        COUNT.put_u16(self.buf, count as u16 - 1);
        DATA_START.put_u16(self.buf, (start + len) as u16);
    }

    /// Replaces the value of the entry at index `i`.
    ///
    /// Returns false if the node has no room for the new value. The node is
    /// unchanged in that case.
    pub(crate) fn set_value(&mut self, i: usize, value: &[u8]) -> bool {
        let node = self.view();
        let (key, old) = node.entry(i);
        if old.len() == value.len() {
            let at = node.offset(i) + ENTRY_HEADER_LEN + key.len();
            self.buf[at..at + value.len()].copy_from_slice(value);
            return true;
        }
        if node.free_space() + old.len() < value.len() {
            return false;
        }
        let key = key.to_vec();
        self.remove(i);
        self.insert(i, &key, value)
    }

    /// Rebuilds the node from a list of entries.
    ///
    /// Returns false if they do not fit.
    pub(crate) fn rebuild<K, V>(&mut self, leaf: bool, link: u32, entries: &[(K, V)]) -> bool
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.init(leaf, link);
        entries
            .iter()
            .enumerate()
            .all(|(i, (k, v))| self.insert(i, k.as_ref(), v.as_ref()))
    }
}

/// Returns where to split a list of entries with the given sizes so that
/// the larger half is as small as possible.
///
/// With `promote`, the entry at the split point moves up to the parent and
/// belongs to neither half. The returned index is in `1..sizes.len()`.
pub(crate) fn split_point(sizes: &[usize], promote: bool) -> usize {
    debug_assert!(sizes.len() >= 2);
    let total: usize = sizes.iter().sum();
    let mut left = 0;
    let mut best = (usize::MAX, 1);
    for (m, &size) in sizes.iter().enumerate().skip(1) {
        left += sizes[m - 1];
        let right = if promote {
            total - left - size
        } else {
            total - left
        };
        let larger = left.max(right);
        if larger < best.0 {
            best = (larger, m);
        }
    }
    best.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        NodeMut::new(&mut buf).init(true, 0);
        buf
    }

    fn keys(node: NodeRef<'_>) -> Vec<Vec<u8>> {
        node.entries().map(|(k, _)| k.to_vec()).collect()
    }

    #[test]
    fn insert_and_search() {
        let mut buf = leaf();
        let mut node = NodeMut::new(&mut buf);
        assert!(node.insert(0, b"b", b"2"));
        assert!(node.insert(0, b"a", b"1"));
        assert!(node.insert(2, b"c", b"3"));
        assert!(node.insert(2, b"b", b"22"));
        let view = node.view();
        assert!(view.is_leaf());
        assert_eq!(keys(view), vec![b"a".to_vec(), b"b".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(view.entry(2), (b"b".as_slice(), b"22".as_slice()));
        assert_eq!(view.lower_bound(b"b"), 1);
        assert_eq!(view.upper_bound(b"b"), 3);
        assert_eq!(view.lower_bound(b"aa"), 1);
        assert_eq!(view.lower_bound(b"d"), 4);
        assert_eq!(view.upper_bound(b""), 0);
        assert_eq!(
            view.free_space(),
            NODE_CAPACITY - entry_size(1, 1) * 3 - entry_size(1, 2)
        );
    }

    #[test]
    fn remove_and_set_value() {
        let mut buf = leaf();
        let mut node = NodeMut::new(&mut buf);
        for (i, key) in [b"k1", b"k2", b"k3"].iter().enumerate() {
            assert!(node.insert(i, *key, b"value"));
        }
        node.remove(1);
        assert_eq!(keys(node.view()), vec![b"k1".to_vec(), b"k3".to_vec()]);
        assert_eq!(node.view().entry(1).1, b"value");
        assert!(node.set_value(0, b"VALUE"));
        assert!(node.set_value(1, b"a longer value"));
        assert!(node.set_value(0, b""));
        assert_eq!(node.view().entry(0), (b"k1".as_slice(), b"".as_slice()));
        assert_eq!(node.view().entry(1), (b"k3".as_slice(), b"a longer value".as_slice()));
        node.remove(0);
        node.remove(0);
        assert_eq!(node.view().len(), 0);
        assert_eq!(node.view().free_space(), NODE_CAPACITY);
    }

    #[test]
    fn full_node() {
        let mut buf = leaf();
        let mut node = NodeMut::new(&mut buf);
        let value = vec![0u8; MAX_VALUE_LEN];
        let key = vec![1u8; MAX_KEY_LEN];
        assert!(node.insert(0, &key, &value));
        assert!(node.insert(1, &key, &value));
        assert!(!node.insert(2, &key, &value));
        assert!(!node.set_value(0, &vec![0u8; MAX_VALUE_LEN + 3000]));
        assert_eq!(node.view().len(), 2);
    }

    #[test]
    fn internal_children() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut node = NodeMut::new(&mut buf);
        node.init(false, 10);
        assert!(node.insert(0, b"m", &encode_child(20)));
        assert!(node.insert(1, b"t", &encode_child(30)));
        let view = node.view();
        assert!(!view.is_leaf());
        assert_eq!(view.children(), vec![10, 20, 30]);
        assert_eq!(view.child_for(b"a", false), 10);
        assert_eq!(view.child_for(b"m", false), 10);
        assert_eq!(view.child_for(b"m", true), 20);
        assert_eq!(view.child_for(b"n", false), 20);
        assert_eq!(view.child_for(b"z", true), 30);
    }

    #[test]
    fn rebuild() {
        let mut buf = leaf();
        let mut node = NodeMut::new(&mut buf);
        let entries = vec![(b"x".to_vec(), b"1".to_vec()), (b"y".to_vec(), b"2".to_vec())];
        assert!(node.rebuild(true, 7, &entries));
        assert_eq!(node.view().link(), 7);
        assert_eq!(keys(node.view()), vec![b"x".to_vec(), b"y".to_vec()]);
    }

    #[test]
    fn split_points() {
        assert_eq!(split_point(&[10, 10, 10, 10], false), 2);
        assert_eq!(split_point(&[30, 10, 10, 10], false), 1);
        assert_eq!(split_point(&[10, 10, 10, 30], false), 3);
        assert_eq!(split_point(&[10, 10, 10], true), 1);
        assert_eq!(split_point(&[10, 10, 10, 10, 10], true), 2);
        assert_eq!(split_point(&[5, 5], false), 1);
    }
}
