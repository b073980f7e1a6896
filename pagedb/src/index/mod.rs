//! Sorted indexes of byte-string keys.
//!
//! An index is a B+tree of node pages found through an anchor object. Keys
//! compare as unsigned byte strings and may repeat; entries with equal keys
//! stay in insertion order.

use std::fmt;

use log::trace;

use crate::{object_store::ObjectAddress, store::Store, Error, ErrorKind, ObjectId, Result};

mod node;
pub use node::{MAX_KEY_LEN, MAX_VALUE_LEN};

mod tree;
pub(crate) use tree::{check_entry, Position, Tree};

mod cursor;
use cursor::CursorState;

fn decode_object_id(value: &[u8]) -> Result<ObjectId> {
    ObjectId::from_bytes(value).ok_or_else(|| {
        Error::with_source(
            ErrorKind::ObjectIdInvalid,
            format!("index value of {} bytes", value.len()),
        )
    })
}

/// A named index of a [`Store`].
///
/// The handle holds only the address of the index's anchor. Every operation
/// takes the store lock and walks the tree from its current root.
pub struct Index<'s> {
    store: &'s Store,
    name: String,
    anchor: ObjectAddress,
}

impl<'s> Index<'s> {
    pub(crate) fn new(store: &'s Store, name: String, anchor: ObjectAddress) -> Self {
        Self {
            store,
            name,
            anchor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts an entry after any entries with an equal key.
    ///
    /// Keys longer than [`MAX_KEY_LEN`] and values longer than
    /// [`MAX_VALUE_LEN`] are rejected without changing the index.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_entry(key, value)?;
        let inner = self.store.lock();
        Tree::new(inner.objects(), self.anchor).insert(key, value)
    }

    /// Inserts an entry whose value is an object identifier.
    pub fn insert_object_id(&self, key: &[u8], id: ObjectId) -> Result<()> {
        self.insert(key, &id.to_bytes())
    }

    /// Returns a new cursor that is not positioned on any entry.
    pub fn open(&self) -> Cursor<'s> {
        Cursor {
            store: self.store,
            anchor: self.anchor,
            state: CursorState::new(),
        }
    }

    /// Returns the identifiers stored under exactly `key`, in entry order.
    ///
    /// The whole scan runs under one acquisition of the store lock.
    pub fn object_ids_matching(&self, key: &[u8]) -> Result<Vec<ObjectId>> {
        let inner = self.store.lock();
        let tree = Tree::new(inner.objects(), self.anchor);
        let mut cursor = CursorState::new();
        let mut ids = Vec::new();
        cursor.find(&tree, key)?;
        while cursor.key_matches(key) {
            if let Some(value) = cursor.value() {
                ids.push(decode_object_id(value)?);
            }
            cursor.next(&tree)?;
        }
        trace!("Found {} identifiers in index {}", ids.len(), self.name);
        Ok(ids)
    }

    /// Returns the number of entries and the depth of the tree.
    pub fn summary(&self) -> Result<(usize, usize)> {
        let inner = self.store.lock();
        Tree::new(inner.objects(), self.anchor).summary()
    }
}

impl fmt::Debug for Index<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("anchor", &self.anchor)
            .finish()
    }
}

/// A cursor over the entries of an [`Index`].
///
/// A new cursor is unset and behaves like a cursor past the end until
/// [`Cursor::find`] positions it. The cursor does not hold pages between
/// calls, so it stays valid while the index changes.
pub struct Cursor<'s> {
    store: &'s Store,
    anchor: ObjectAddress,
    state: CursorState,
}

impl<'s> Cursor<'s> {
    /// Positions the cursor at the first entry whose key is not less than
    /// `key`, or past the end if there is none.
    pub fn find(&mut self, key: &[u8]) -> Result<()> {
        let inner = self.store.lock();
        self.state.find(&Tree::new(inner.objects(), self.anchor), key)
    }

    /// Advances the cursor by one entry. Does nothing past the end.
    pub fn next(&mut self) -> Result<()> {
        let inner = self.store.lock();
        self.state.next(&Tree::new(inner.objects(), self.anchor))
    }

    /// Returns true if the cursor is on an entry whose key equals `key`.
    pub fn key_matches(&self, key: &[u8]) -> bool {
        self.state.key_matches(key)
    }

    pub fn is_at_end(&self) -> bool {
        self.state.is_at_end()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.state.key()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.state.value()
    }

    /// Returns the value of the current entry as an object identifier.
    pub fn object_id(&self) -> Result<Option<ObjectId>> {
        self.state.value().map(decode_object_id).transpose()
    }

    /// Removes the current entry and moves to the following one.
    pub fn remove(&mut self) -> Result<()> {
        let inner = self.store.lock();
        self.state.remove(&Tree::new(inner.objects(), self.anchor))
    }

    /// Replaces the value of the current entry.
    pub fn update_value(&mut self, value: &[u8]) -> Result<()> {
        let inner = self.store.lock();
        self.state
            .update_value(&Tree::new(inner.objects(), self.anchor), value)
    }

    /// Closes the cursor.
    pub fn close(mut self) {
        self.state.reset();
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("anchor", &self.anchor)
            .field("key", &self.state.key())
            .finish()
    }
}
