use log::{debug, trace};

use super::node::{
    encode_child, entry_size, is_node, split_point, NodeMut, NodeRef, MAX_KEY_LEN, MAX_VALUE_LEN,
};
use crate::{
    object_store::{ObjectAddress, ObjectStore},
    page_store::PageGuard,
    Error, ErrorKind, Result,
};

/// The object type of an index anchor.
pub(crate) const ANCHOR_TYPE: u8 = 1;

/// A position in the leaf level of a tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Position {
    pub(crate) page: u32,
    pub(crate) slot: usize,
}

type Entry = (Vec<u8>, Vec<u8>);

/// Checks entry limits before anything is touched.
pub(crate) fn check_entry(key: &[u8], value: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(Error::with_source(
            ErrorKind::EntryKeyLength,
            format!("key of {} bytes exceeds {MAX_KEY_LEN}", key.len()),
        ));
    }
    check_value(value)
}

fn check_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_LEN {
        return Err(Error::with_source(
            ErrorKind::EntryValueLength,
            format!("value of {} bytes exceeds {MAX_VALUE_LEN}", value.len()),
        ));
    }
    Ok(())
}

/// A B+tree of index nodes, found through its anchor object.
///
/// The anchor holds the page number of the root. Nodes are split in place
/// and never merged, so emptied leaves stay linked into the leaf level.
pub(crate) struct Tree<'a> {
    objects: &'a ObjectStore,
    anchor: ObjectAddress,
}

impl<'a> Tree<'a> {
    pub(crate) fn new(objects: &'a ObjectStore, anchor: ObjectAddress) -> Self {
        Self { objects, anchor }
    }

    /// Creates an empty tree and returns the address of its anchor.
    pub(crate) fn create(objects: &'a ObjectStore) -> Result<ObjectAddress> {
        let root = {
            let page = objects
                .allocate_node_page()
                .map_err(|e| Error::with_source(ErrorKind::IndexNodeNotCreated, e))?;
            NodeMut::new(&mut page.write()).init(true, 0);
            page.number()
        };
        let anchor = objects
            .insert(ANCHOR_TYPE, &encode_child(root))
            .map_err(|e| Error::with_source(ErrorKind::IndexNotCreated, e))?;
        debug!("Create index {anchor} with root {root}");
        Ok(anchor)
    }

    pub(crate) fn anchor(&self) -> ObjectAddress {
        self.anchor
    }

    pub(crate) fn root(&self) -> Result<u32> {
        let data = self
            .objects
            .get_as(self.anchor, ANCHOR_TYPE)
            .map_err(|e| Error::with_source(ErrorKind::IndexNotFound, e))?;
        let bytes: [u8; 4] = data.as_slice().try_into().map_err(|_| {
            Error::with_source(ErrorKind::StoreFormat, format!("anchor {}", self.anchor))
        })?;
        Ok(u32::from_be_bytes(bytes))
    }

    fn set_root(&self, root: u32) -> Result<()> {
        let moved = self
            .objects
            .update(self.anchor, &encode_child(root))
            .map_err(|e| Error::with_source(ErrorKind::IndexNodeNotStored, e))?;
        debug_assert_eq!(moved, self.anchor);
        Ok(())
    }

    fn node(&self, number: u32) -> Result<PageGuard<'a>> {
        let page = self
            .objects
            .page_store()
            .acquire(number)
            .map_err(|e| Error::with_source(ErrorKind::IndexNodeNotRetrieved, e))?;
        if !is_node(&page.read()) {
            return Err(Error::with_source(
                ErrorKind::IndexNodeNotRetrieved,
                format!("page {number} is not an index node"),
            ));
        }
        Ok(page)
    }

    /// Inserts an entry after all entries with an equal key.
    pub(crate) fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_entry(key, value)?;
        let root = self.root()?;
        let mut path = Vec::new();
        let mut number = root;
        loop {
            let page = self.node(number)?;
            let data = page.read();
            let node = NodeRef::new(&data);
            if node.is_leaf() {
                break;
            }
            path.push(number);
            number = node.child_for(key, true);
        }

        let mut split = self.insert_into(number, key, value)?;
        while let Some((separator, right)) = split {
            match path.pop() {
                Some(parent) => {
                    split = self.insert_into(parent, &separator, &encode_child(right))?;
                }
                None => {
                    self.grow(root, &separator, right)?;
                    break;
                }
            }
        }
        trace!("Insert an entry into index {}", self.anchor);
        Ok(())
    }

    /// Inserts an entry into a node, splitting it if it is full.
    ///
    /// Returns the separator and the new right node of a split.
    fn insert_into(&self, number: u32, key: &[u8], value: &[u8]) -> Result<Option<(Vec<u8>, u32)>> {
        let page = self.node(number)?;
        let (index, fits) = {
            let data = page.read();
            let node = NodeRef::new(&data);
            let fits = node.free_space() >= entry_size(key.len(), value.len());
            (node.upper_bound(key), fits)
        };
        if fits {
            let inserted = NodeMut::new(&mut page.write()).insert(index, key, value);
            debug_assert!(inserted);
            return Ok(None);
        }

        let (leaf, link, mut entries) = {
            let data = page.read();
            let node = NodeRef::new(&data);
            let entries: Vec<Entry> = node
                .entries()
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect();
            (node.is_leaf(), node.link(), entries)
        };
        entries.insert(index, (key.to_vec(), value.to_vec()));
        let sizes: Vec<usize> = entries
            .iter()
            .map(|(k, v)| entry_size(k.len(), v.len()))
            .collect();
        let m = split_point(&sizes, !leaf);

        let right = self
            .objects
            .allocate_node_page()
            .map_err(|e| Error::with_source(ErrorKind::IndexNodeNotCreated, e))?;
        let separator = entries[m].0.clone();
        let rebuilt = if leaf {
            NodeMut::new(&mut right.write()).rebuild(true, link, &entries[m..])
                && NodeMut::new(&mut page.write()).rebuild(true, right.number(), &entries[..m])
        } else {
            let right_link = u32::from_be_bytes(entries[m].1.as_slice().try_into().map_err(|_| {
                Error::with_source(ErrorKind::IndexNodeNotSplit, format!("page {number}"))
            })?);
            NodeMut::new(&mut right.write()).rebuild(false, right_link, &entries[m + 1..])
                && NodeMut::new(&mut page.write()).rebuild(false, link, &entries[..m])
        };
        if !rebuilt {
            return Err(Error::with_source(
                ErrorKind::IndexNodeNotSplit,
                format!("page {number}"),
            ));
        }
        debug!(
            "Split index node {} at {} of {} entries into {}",
            number,
            m,
            entries.len(),
            right.number()
        );
        Ok(Some((separator, right.number())))
    }

    /// Puts a new root above a split root.
    fn grow(&self, left: u32, separator: &[u8], right: u32) -> Result<()> {
        let root = self
            .objects
            .allocate_node_page()
            .map_err(|e| Error::with_source(ErrorKind::IndexNodeNotCreated, e))?;
        {
            let mut data = root.write();
            let mut node = NodeMut::new(&mut data);
            node.init(false, left);
            if !node.insert(0, separator, &encode_child(right)) {
                return Err(Error::with_source(
                    ErrorKind::IndexNodeNotSplit,
                    format!("root {left}"),
                ));
            }
        }
        self.set_root(root.number())?;
        debug!("Grow index {} with root {}", self.anchor, root.number());
        Ok(())
    }

    /// Returns the position of the first entry whose key is not less than
    /// `key`, or `None` if there is no such entry.
    pub(crate) fn seek(&self, key: &[u8]) -> Result<Option<Position>> {
        let mut number = self.root()?;
        loop {
            let page = self.node(number)?;
            let data = page.read();
            let node = NodeRef::new(&data);
            if node.is_leaf() {
                let slot = node.lower_bound(key);
                drop(data);
                return self.settle(Position { page: number, slot });
            }
            number = node.child_for(key, false);
        }
    }

    /// Moves a position that is past the end of its leaf to the first entry
    /// of the following leaves.
    pub(crate) fn settle(&self, mut pos: Position) -> Result<Option<Position>> {
        loop {
            let page = self.node(pos.page)?;
            let data = page.read();
            let node = NodeRef::new(&data);
            if pos.slot < node.len() {
                return Ok(Some(pos));
            }
            match node.link() {
                0 => return Ok(None),
                next => pos = Position { page: next, slot: 0 },
            }
        }
    }

    /// Returns the entry at a position, or `None` if the position no longer
    /// exists.
    pub(crate) fn entry_at(&self, pos: Position) -> Result<Option<Entry>> {
        let page = self
            .objects
            .page_store()
            .acquire(pos.page)
            .map_err(|e| Error::with_source(ErrorKind::IndexNodeNotRetrieved, e))?;
        let data = page.read();
        if !is_node(&data) {
            return Ok(None);
        }
        let node = NodeRef::new(&data);
        if !node.is_leaf() || pos.slot >= node.len() {
            return Ok(None);
        }
        let (key, value) = node.entry(pos.slot);
        Ok(Some((key.to_vec(), value.to_vec())))
    }

    /// Removes the entry at a position.
    pub(crate) fn remove_at(&self, pos: Position) -> Result<()> {
        let page = self.node(pos.page)?;
        if pos.slot >= NodeRef::new(&page.read()).len() {
            return Err(Error::with_source(
                ErrorKind::EntryNotRemoved,
                format!("slot {} of page {}", pos.slot, pos.page),
            ));
        }
        NodeMut::new(&mut page.write()).remove(pos.slot);
        trace!("Remove an entry from index {}", self.anchor);
        Ok(())
    }

    /// Replaces the value of the entry at a position.
    ///
    /// If the leaf has no room for the new value, the entry is removed and
    /// inserted again, after any other entries with the same key.
    pub(crate) fn update_at(&self, pos: Position, value: &[u8]) -> Result<()> {
        check_value(value)?;
        let page = self.node(pos.page)?;
        let key = {
            let data = page.read();
            let node = NodeRef::new(&data);
            if pos.slot >= node.len() {
                return Err(Error::with_source(
                    ErrorKind::EntryNotUpdated,
                    format!("slot {} of page {}", pos.slot, pos.page),
                ));
            }
            node.key(pos.slot).to_vec()
        };
        let updated = NodeMut::new(&mut page.write()).set_value(pos.slot, value);
        if updated {
            return Ok(());
        }
        drop(page);
        self.remove_at(pos)
            .and_then(|_| self.insert(&key, value))
            .map_err(|e| Error::with_source(ErrorKind::EntryNotUpdated, e))
    }

    /// Frees every node of the tree and its anchor.
    pub(crate) fn destroy(&self) -> Result<()> {
        let mut pending = vec![self.root()?];
        let mut freed = 0;
        while let Some(number) = pending.pop() {
            {
                let page = self.node(number)?;
                let data = page.read();
                let node = NodeRef::new(&data);
                if !node.is_leaf() {
                    pending.extend(node.children());
                }
            }
            self.objects
                .free_node_page(number)
                .map_err(|e| Error::with_source(ErrorKind::IndexNotRemoved, e))?;
            freed += 1;
        }
        self.objects
            .remove(self.anchor)
            .map_err(|e| Error::with_source(ErrorKind::IndexNotRemoved, e))?;
        debug!("Destroy index {} with {} nodes", self.anchor, freed);
        Ok(())
    }

    /// Returns the number of entries and the depth of the tree.
    pub(crate) fn summary(&self) -> Result<(usize, usize)> {
        let mut depth = 1;
        let mut number = self.root()?;
        loop {
            let page = self.node(number)?;
            let data = page.read();
            let node = NodeRef::new(&data);
            if node.is_leaf() {
                break;
            }
            depth += 1;
            number = node.link();
        }
        let mut entries = 0;
        while number != 0 {
            let page = self.node(number)?;
            let data = page.read();
            let node = NodeRef::new(&data);
            entries += node.len();
            number = node.link();
        }
        Ok((entries, depth))
    }
}
