use log::trace;

use super::tree::{Position, Tree};
use crate::{Error, ErrorKind, Result};

/// The entry a cursor stands on.
#[derive(Clone, Debug)]
struct Current {
    pos: Position,
    key: Vec<u8>,
    value: Vec<u8>,
    /// The index of the entry among the entries with the same key.
    ordinal: usize,
}

/// Where a remembered entry was found again.
enum Found {
    /// The entry still exists at this position, with its ordinal.
    At(Position, usize),
    /// The entry is gone. The position is the first entry not less than its
    /// key, which takes its place.
    Replaced(Option<Position>),
}

/// The position of a cursor between calls.
///
/// No pages are held between calls. The cursor keeps a copy of its entry
/// and checks it against the tree before moving, since inserts and splits
/// shift entries between slots and pages.
///
/// Entries with equal keys keep their insertion order and new ones go after
/// them, so the ordinal of an entry only shrinks when an equal-key entry
/// before it is removed. The ordinal tells identical copies of an entry
/// apart.
#[derive(Clone, Debug, Default)]
pub(crate) struct CursorState {
    current: Option<Current>,
}

impl CursorState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.current.is_none()
    }

    pub(crate) fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|c| c.key.as_slice())
    }

    pub(crate) fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|c| c.value.as_slice())
    }

    pub(crate) fn key_matches(&self, key: &[u8]) -> bool {
        self.key() == Some(key)
    }

    /// Moves to the first entry whose key is not less than `key`.
    pub(crate) fn find(&mut self, tree: &Tree<'_>, key: &[u8]) -> Result<()> {
        let pos = tree.seek(key)?;
        self.current = None;
        self.load(tree, pos, 0)
    }

    /// Moves to the following entry. Does nothing at the end.
    pub(crate) fn next(&mut self, tree: &Tree<'_>) -> Result<()> {
        match self.relocate(tree)? {
            Some(Found::At(pos, ordinal)) => {
                let next = tree.settle(Position {
                    page: pos.page,
                    slot: pos.slot + 1,
                })?;
                self.load(tree, next, ordinal + 1)
            }
            Some(Found::Replaced(pos)) => self.load(tree, pos, 0),
            None => Ok(()),
        }
    }

    /// Removes the current entry and moves to the following one.
    pub(crate) fn remove(&mut self, tree: &Tree<'_>) -> Result<()> {
        let Some(Found::At(pos, ordinal)) = self.relocate(tree)? else {
            return Err(Error::with_source(
                ErrorKind::EntryNotRemoved,
                "cursor is not on an entry",
            ));
        };
        tree.remove_at(pos)?;
        let next = tree.settle(pos)?;
        self.load(tree, next, ordinal)
    }

    /// Replaces the value of the current entry.
    pub(crate) fn update_value(&mut self, tree: &Tree<'_>, value: &[u8]) -> Result<()> {
        let Some(Found::At(pos, _)) = self.relocate(tree)? else {
            return Err(Error::with_source(
                ErrorKind::EntryNotUpdated,
                "cursor is not on an entry",
            ));
        };
        tree.update_at(pos, value)?;
        if let Some(current) = &mut self.current {
            current.value = value.to_vec();
        }
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.current = None;
    }

    /// Moves to the entry at `pos`. `ordinal` applies if the entry has the
    /// key of the current one, otherwise the entry starts a new key.
    fn load(&mut self, tree: &Tree<'_>, pos: Option<Position>, ordinal: usize) -> Result<()> {
        let entry = match pos {
            Some(pos) => tree.entry_at(pos)?.map(|entry| (pos, entry)),
            None => None,
        };
        let Some((pos, (key, value))) = entry else {
            self.current = None;
            return Ok(());
        };
        let ordinal = if self.key_matches(&key) { ordinal } else { 0 };
        self.current = Some(Current {
            pos,
            key,
            value,
            ordinal,
        });
        Ok(())
    }

    /// Finds the current entry in the tree again.
    ///
    /// Returns `None` if the cursor is unset or at the end.
    fn relocate(&self, tree: &Tree<'_>) -> Result<Option<Found>> {
        let Some(current) = &self.current else {
            return Ok(None);
        };
        if stands_on(tree, current)? {
            return Ok(Some(Found::At(current.pos, current.ordinal)));
        }
        trace!("Cursor entry moved, seek it again");
        let first = tree.seek(&current.key)?;
        let mut pos = first;
        let mut ordinal = 0;
        let mut found = None;
        while let Some(p) = pos {
            if ordinal > current.ordinal && found.is_some() {
                break;
            }
            let Some((key, value)) = tree.entry_at(p)? else {
                break;
            };
            if key != current.key {
                break;
            }
            // Prefer the last copy at or before the remembered ordinal.
            if value == current.value {
                if ordinal <= current.ordinal || found.is_none() {
                    found = Some((p, ordinal));
                }
                if ordinal >= current.ordinal {
                    break;
                }
            }
            ordinal += 1;
            pos = tree.settle(Position {
                page: p.page,
                slot: p.slot + 1,
            })?;
        }
        Ok(Some(match found {
            Some((p, ordinal)) => Found::At(p, ordinal),
            None => Found::Replaced(first),
        }))
    }
}

/// Returns true if the remembered position still holds the current entry.
///
/// The entry must match and its run of equal keys must start `ordinal`
/// slots earlier in the same leaf. A run that may continue from an earlier
/// leaf is not checked here.
fn stands_on(tree: &Tree<'_>, current: &Current) -> Result<bool> {
    match tree.entry_at(current.pos)? {
        Some((key, value)) if key == current.key && value == current.value => {}
        _ => return Ok(false),
    }
    let Some(start) = current.pos.slot.checked_sub(current.ordinal) else {
        return Ok(false);
    };
    if start == 0 {
        return Ok(false);
    }
    let page = current.pos.page;
    let first = tree.entry_at(Position { page, slot: start })?;
    let before = tree.entry_at(Position {
        page,
        slot: start - 1,
    })?;
    Ok(matches!(first, Some((k, _)) if k == current.key)
        && matches!(before, Some((k, _)) if k != current.key))
}
