use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    index::{check_entry, Index, Position, Tree},
    object_store::{ObjectAddress, ObjectStore},
    page_store::{PageStoreOptions, PageStoreStats, METADATA_AREAS, METADATA_AREA_SIZE},
    util::field::{Pointer, PointerMut},
    Error, ErrorKind, ObjectId, Result,
};

/// The object type of stored objects.
const DATA_TYPE: u8 = 2;

/// The metadata area that holds the store context.
const CONTEXT_AREA: usize = 1;

/// The first metadata area available to applications.
pub const FIRST_USER_AREA: usize = CONTEXT_AREA + 1;

/// Options to configure a store.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Options for the underlying page store.
    pub page_store: PageStoreOptions,

    /// If false, opening a file without a store fails with
    /// [`ErrorKind::StoreEmpty`] instead of initializing one.
    ///
    /// Default: true
    pub create_if_missing: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_store: PageStoreOptions::default(),
            create_if_missing: true,
        }
    }
}

/// Store context format {
///     next_object_id : 8 bytes
///     directory      : 6 bytes (anchor of the object directory)
///     names          : 6 bytes (anchor of the index names)
/// }
///
/// The object directory maps object identifiers to object addresses. The
/// index names map index names to index anchors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Context {
    next_object_id: i64,
    directory: ObjectAddress,
    names: ObjectAddress,
}

impl Context {
    fn decode(area: &[u8; METADATA_AREA_SIZE]) -> Option<Self> {
        let mut r = Pointer::at(area, 0);
        let next_object_id = r.get_i64();
        if next_object_id == 0 {
            return None;
        }
        let directory = ObjectAddress::from_bytes(r.get_slice(ObjectAddress::SIZE))?;
        let names = ObjectAddress::from_bytes(r.get_slice(ObjectAddress::SIZE))?;
        Some(Self {
            next_object_id,
            directory,
            names,
        })
    }

    fn encode(&self) -> [u8; METADATA_AREA_SIZE] {
        let mut area = [0; METADATA_AREA_SIZE];
        let mut w = PointerMut::at(&mut area, 0);
        w.put_i64(self.next_object_id);
        w.put_slice(&self.directory.to_bytes());
        w.put_slice(&self.names.to_bytes());
        area
    }
}

pub(crate) struct StoreInner {
    objects: ObjectStore,
    context: Context,
}

impl StoreInner {
    pub(crate) fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    fn directory(&self) -> Tree<'_> {
        Tree::new(&self.objects, self.context.directory)
    }

    fn names(&self) -> Tree<'_> {
        Tree::new(&self.objects, self.context.names)
    }

    /// Discards uncommitted changes and reloads the committed context.
    ///
    /// Identifiers handed out since the last commit stay used, so an id held
    /// from a discarded object never names a different one.
    fn reload(&mut self) -> Result<()> {
        let issued = self.context.next_object_id;
        self.objects.rollback()?;
        let area = self.objects.read_metadata_area(CONTEXT_AREA)?;
        self.context = Context::decode(&area).ok_or(ErrorKind::StoreEmpty)?;
        if issued > self.context.next_object_id {
            debug!("Keep object ids below {issued} after rollback");
            self.context.next_object_id = issued;
            self.save_context()?;
        }
        Ok(())
    }

    fn save_context(&self) -> Result<()> {
        self.objects
            .write_metadata_area(CONTEXT_AREA, &self.context.encode())?;
        Ok(())
    }
}

/// Returns the position and value of the entry with exactly `key`.
fn lookup(tree: &Tree<'_>, key: &[u8]) -> Result<Option<(Position, Vec<u8>)>> {
    let Some(pos) = tree.seek(key)? else {
        return Ok(None);
    };
    Ok(tree
        .entry_at(pos)?
        .filter(|(found, _)| found == key)
        .map(|(_, value)| (pos, value)))
}

fn decode_address(value: &[u8]) -> Result<ObjectAddress> {
    ObjectAddress::from_bytes(value).ok_or_else(|| {
        Error::with_source(
            ErrorKind::StoreFormat,
            format!("address of {} bytes", value.len()),
        )
    })
}

/// A store of objects and named indexes in a single file.
///
/// Objects are referred to by [`ObjectId`]s that stay valid when the object
/// moves. One lock guards the whole store and is held for the duration of
/// every operation, including each call on an [`Index`] or a cursor.
pub struct Store {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl Store {
    /// Opens the store at `path` with default options, creating it if it
    /// does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let objects = ObjectStore::open_with(&path, options.page_store)?;
        let area = objects.read_metadata_area(CONTEXT_AREA)?;
        let context = match Context::decode(&area) {
            Some(context) => context,
            None if !options.create_if_missing => {
                objects.close(false);
                return Err(Error::with_source(
                    ErrorKind::StoreEmpty,
                    format!("{} holds no store", path.display()),
                ));
            }
            None => Self::init(&objects)
                .map_err(|e| Error::with_source(ErrorKind::StoreNotCreated, e))?,
        };
        info!(
            "Open store {} with next object id {}",
            path.display(),
            context.next_object_id
        );
        Ok(Self {
            path,
            inner: Mutex::new(StoreInner { objects, context }),
        })
    }

    /// Creates the internal indexes of an empty store.
    fn init(objects: &ObjectStore) -> Result<Context> {
        let context = Context {
            next_object_id: 1,
            directory: Tree::create(objects)?,
            names: Tree::create(objects)?,
        };
        objects.write_metadata_area(CONTEXT_AREA, &context.encode())?;
        objects.commit()?;
        debug!("Initialize an empty store");
        Ok(context)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> PageStoreStats {
        self.lock().objects.stats()
    }

    /// Creates an empty index.
    pub fn create_index(&self, name: &str) -> Result<Index<'_>> {
        check_entry(name.as_bytes(), &[0; ObjectAddress::SIZE])?;
        let inner = self.lock();
        let names = inner.names();
        if lookup(&names, name.as_bytes())?.is_some() {
            return Err(Error::with_source(ErrorKind::IndexExists, name.to_owned()));
        }
        let anchor = Tree::create(&inner.objects)?;
        names
            .insert(name.as_bytes(), &anchor.to_bytes())
            .map_err(|e| Error::with_source(ErrorKind::IndexNotCreated, e))?;
        debug!("Create index {name} at {anchor}");
        Ok(Index::new(self, name.to_owned(), anchor))
    }

    /// Returns an existing index.
    pub fn get_index(&self, name: &str) -> Result<Index<'_>> {
        let inner = self.lock();
        let Some((_, value)) = lookup(&inner.names(), name.as_bytes())? else {
            return Err(Error::with_source(ErrorKind::IndexNotFound, name.to_owned()));
        };
        Ok(Index::new(self, name.to_owned(), decode_address(&value)?))
    }

    /// Removes an index and all of its entries.
    pub fn remove_index(&self, name: &str) -> Result<()> {
        let inner = self.lock();
        let names = inner.names();
        let Some((pos, value)) = lookup(&names, name.as_bytes())? else {
            return Err(Error::with_source(ErrorKind::IndexNotFound, name.to_owned()));
        };
        let anchor = decode_address(&value)?;
        names
            .remove_at(pos)
            .and_then(|_| Tree::new(&inner.objects, anchor).destroy())
            .map_err(|e| Error::with_source(ErrorKind::IndexNotRemoved, e))?;
        debug!("Remove index {name}");
        Ok(())
    }

    /// Returns the names of all indexes in ascending order.
    pub fn index_names(&self) -> Result<Vec<String>> {
        let inner = self.lock();
        let names = inner.names();
        let mut result = Vec::new();
        let mut pos = names.seek(b"")?;
        while let Some(p) = pos {
            if let Some((key, _)) = names.entry_at(p)? {
                let name = String::from_utf8(key)
                    .map_err(|e| Error::with_source(ErrorKind::StoreFormat, e))?;
                result.push(name);
            }
            pos = names.settle(Position {
                page: p.page,
                slot: p.slot + 1,
            })?;
        }
        Ok(result)
    }

    /// Stores an object and returns its new identifier.
    pub fn create_object(&self, data: &[u8]) -> Result<ObjectId> {
        let mut inner = self.lock();
        let address = inner.objects.insert(DATA_TYPE, data)?;
        let id = ObjectId::new(inner.context.next_object_id);
        inner
            .directory()
            .insert(&id.to_bytes(), &address.to_bytes())
            .map_err(|e| Error::with_source(ErrorKind::ObjectNotCreated, e))?;
        inner.context.next_object_id += 1;
        inner.save_context()?;
        Ok(id)
    }

    /// Returns the data of an object.
    pub fn get_object(&self, id: ObjectId) -> Result<Vec<u8>> {
        let inner = self.lock();
        let (_, address) = locate(&inner, id)?;
        Ok(inner.objects.get_as(address, DATA_TYPE)?)
    }

    /// Replaces the data of an object.
    pub fn update_object(&self, id: ObjectId, data: &[u8]) -> Result<()> {
        let inner = self.lock();
        let (pos, address) = locate(&inner, id)?;
        let moved = inner
            .objects
            .update(address, data)
            .map_err(|e| Error::with_source(ErrorKind::ObjectNotUpdated, e))?;
        if moved != address {
            inner.directory().update_at(pos, &moved.to_bytes())?;
        }
        Ok(())
    }

    /// Removes an object. Its identifier is not reused.
    pub fn remove_object(&self, id: ObjectId) -> Result<()> {
        let inner = self.lock();
        let (pos, address) = locate(&inner, id)?;
        inner
            .objects
            .remove(address)
            .map_err(|e| Error::with_source(ErrorKind::ObjectNotRemoved, e))?;
        inner.directory().remove_at(pos)
    }

    /// Reads an application metadata area.
    ///
    /// Areas below [`FIRST_USER_AREA`] are reserved.
    pub fn read_metadata(&self, i: usize) -> Result<[u8; METADATA_AREA_SIZE]> {
        check_user_area(i)?;
        Ok(self.lock().objects.read_metadata_area(i)?)
    }

    /// Stages a write of an application metadata area.
    pub fn write_metadata(&self, i: usize, data: &[u8]) -> Result<()> {
        check_user_area(i)?;
        Ok(self.lock().objects.write_metadata_area(i, data)?)
    }

    /// Makes all changes since the last commit durable.
    pub fn commit(&self) -> Result<()> {
        self.lock()
            .objects
            .commit()
            .map_err(|e| Error::with_source(ErrorKind::StoreNotCommitted, e))
    }

    /// Discards all changes since the last commit.
    pub fn rollback(&self) -> Result<()> {
        self.lock()
            .reload()
            .map_err(|e| Error::with_source(ErrorKind::StoreNotRolledBack, e))
    }

    /// Commits pending changes and closes the store.
    pub fn close(self) -> Result<()> {
        let inner = self.inner.into_inner();
        let result = inner
            .objects
            .commit()
            .map_err(|e| Error::with_source(ErrorKind::StoreNotClosed, e));
        if let Err(err) = &result {
            warn!("Close store {} without committing: {}", self.path.display(), err);
        }
        inner.objects.close(false);
        result
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

fn check_user_area(i: usize) -> Result<()> {
    if !(FIRST_USER_AREA..METADATA_AREAS).contains(&i) {
        return Err(Error::with_source(
            ErrorKind::MetadataRequest,
            format!("area {i} is not an application area"),
        ));
    }
    Ok(())
}

/// Resolves an object identifier through the object directory.
fn locate(inner: &StoreInner, id: ObjectId) -> Result<(Position, ObjectAddress)> {
    if !id.is_valid() {
        return Err(Error::with_source(ErrorKind::ObjectIdInvalid, id.to_string()));
    }
    match lookup(&inner.directory(), &id.to_bytes())? {
        Some((pos, value)) => Ok((pos, decode_address(&value)?)),
        None => Err(Error::with_source(ErrorKind::ObjectNotFound, id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use tempfile::tempdir;

    use super::*;
    use crate::{MAX_KEY_LEN, MAX_VALUE_LEN};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn entry_bounds_leave_index_unchanged() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("store.pdb")).unwrap();
        let index = store.create_index("bounds").unwrap();
        let long_key = vec![b'k'; MAX_KEY_LEN + 1];
        let err = index.insert(&long_key, b"v").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryKeyLength);
        let err = index.insert(b"k", &vec![0; MAX_VALUE_LEN + 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryValueLength);

        let mut cursor = index.open();
        cursor.find(&long_key[..MAX_KEY_LEN]).unwrap();
        assert!(cursor.is_at_end());
        cursor.find(b"k").unwrap();
        assert!(cursor.is_at_end());
        cursor.close();
        assert_eq!(index.summary().unwrap(), (0, 1));
    }

    #[test]
    fn exact_match_scan() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("store.pdb")).unwrap();
        let index = store.create_index("words").unwrap();
        let a = store.create_object(b"object a").unwrap();
        let ab = store.create_object(b"object ab").unwrap();
        let b = store.create_object(b"object b").unwrap();
        index.insert_object_id(b"a", a).unwrap();
        index.insert_object_id(b"ab", ab).unwrap();
        index.insert_object_id(b"b", b).unwrap();

        assert_eq!(index.object_ids_matching(b"a").unwrap(), vec![a]);
        assert!(index.object_ids_matching(b"aa").unwrap().is_empty());

        let mut cursor = index.open();
        cursor.find(b"aa").unwrap();
        assert_eq!(cursor.key(), Some(b"ab".as_slice()));
        assert_eq!(cursor.object_id().unwrap(), Some(ab));
        assert_eq!(store.get_object(ab).unwrap(), b"object ab");
        cursor.close();

        index.insert_object_id(b"a", b).unwrap();
        assert_eq!(index.object_ids_matching(b"a").unwrap(), vec![a, b]);
        index.insert(b"a", b"bad").unwrap();
        let err = index.object_ids_matching(b"a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectIdInvalid);
    }

    #[test]
    fn random_inserts_match_sorted_entries() {
        init_logger();
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("store.pdb")).unwrap();
        let index = store.create_index("random").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut expected = Vec::new();
        for i in 0..3000u32 {
            let len = rng.gen_range(1..64);
            let key: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'f')).collect();
            let value = i.to_be_bytes().to_vec();
            index.insert(&key, &value).unwrap();
            expected.push((key, value));
        }
        // A stable sort keeps equal keys in insertion order.
        expected.sort_by(|x, y| x.0.cmp(&y.0));

        let mut cursor = index.open();
        cursor.find(b"").unwrap();
        let mut found = Vec::new();
        while !cursor.is_at_end() {
            found.push((
                cursor.key().unwrap().to_vec(),
                cursor.value().unwrap().to_vec(),
            ));
            cursor.next().unwrap();
        }
        assert_eq!(found, expected);
        assert_eq!(store.lock().objects().page_store().outstanding_pages(), 0);
    }

    #[test]
    fn objects_survive_reopen() {
        init_logger();
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = Store::open(&path).unwrap();
        let small = store.create_object(b"small").unwrap();
        let big = store.create_object(&[1; 1000]).unwrap();
        let gone = store.create_object(b"gone").unwrap();
        assert_eq!(
            (small, big, gone),
            (ObjectId::new(1), ObjectId::new(2), ObjectId::new(3))
        );
        store.update_object(small, &[2; 7000]).unwrap();
        store.remove_object(gone).unwrap();
        let index = store.create_index("sizes").unwrap();
        index.insert_object_id(b"big", big).unwrap();
        store.write_metadata(FIRST_USER_AREA, b"app").unwrap();
        drop(index);
        store.close().unwrap();

        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_object(small).unwrap(), vec![2; 7000]);
        assert_eq!(store.get_object(big).unwrap(), vec![1; 1000]);
        let err = store.get_object(gone).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
        let err = store.get_object(ObjectId::INVALID).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectIdInvalid);
        assert_eq!(&store.read_metadata(FIRST_USER_AREA).unwrap()[..3], b"app");
        let err = store.read_metadata(CONTEXT_AREA).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataRequest);

        let index = store.get_index("sizes").unwrap();
        assert_eq!(index.object_ids_matching(b"big").unwrap(), vec![big]);
        // Identifiers are never reused.
        assert_eq!(store.create_object(b"new").unwrap(), ObjectId::new(4));
    }

    #[test]
    fn index_names() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("store.pdb")).unwrap();
        store.create_index("people").unwrap();
        let places = store.create_index("places").unwrap();
        for i in 0..500u32 {
            places.insert(&i.to_be_bytes(), &[0; 32]).unwrap();
        }
        let err = store.create_index("people").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexExists);
        assert_eq!(store.index_names().unwrap(), vec!["people", "places"]);

        store.remove_index("places").unwrap();
        assert_eq!(store.index_names().unwrap(), vec!["people"]);
        let err = store.get_index("places").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexNotFound);
        let err = store.remove_index("places").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexNotFound);
        let err = places.insert(b"k", b"v").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexNotFound);
    }

    #[test]
    fn rollback_discards_changes() {
        init_logger();
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("store.pdb")).unwrap();
        let kept = store.create_object(b"kept").unwrap();
        store.commit().unwrap();

        let dropped = store.create_object(b"dropped").unwrap();
        store.create_index("temporary").unwrap();
        store.rollback().unwrap();

        assert_eq!(store.get_object(kept).unwrap(), b"kept");
        let err = store.get_object(dropped).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
        assert!(store.index_names().unwrap().is_empty());
        let again = store.create_object(b"again").unwrap();
        assert_ne!(again, dropped);
        let err = store.get_object(dropped).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
        assert_eq!(store.get_object(again).unwrap(), b"again");
    }

    #[test]
    fn open_without_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let mut options = StoreOptions::default();
        options.create_if_missing = false;
        let err = Store::open_with(&path, options.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreEmpty);

        Store::open(&path).unwrap().close().unwrap();
        let store = Store::open_with(&path, options).unwrap();
        assert!(store.index_names().unwrap().is_empty());
    }

    #[test]
    fn rolled_back_ids_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pdb");
        let store = Store::open(&path).unwrap();
        let dropped = store.create_object(b"first").unwrap();
        store.rollback().unwrap();
        store.commit().unwrap();
        store.close().unwrap();

        let store = Store::open(&path).unwrap();
        let id = store.create_object(b"second").unwrap();
        assert!(id > dropped);
        assert_eq!(
            store.get_object(dropped).unwrap_err().kind(),
            ErrorKind::ObjectNotFound
        );
        // Failed operations release every page they acquired.
        assert_eq!(store.lock().objects().page_store().outstanding_pages(), 0);
    }

    #[test]
    fn cursor_edits() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("store.pdb")).unwrap();
        let index = store.create_index("edits").unwrap();
        for key in [b"a", b"b", b"c"] {
            index.insert(key, b"1").unwrap();
        }
        let mut cursor = index.open();
        cursor.find(b"b").unwrap();
        cursor.update_value(b"2").unwrap();
        cursor.remove().unwrap();
        assert!(cursor.key_matches(b"c"));
        cursor.next().unwrap();
        assert!(cursor.is_at_end());
        assert!(!cursor.key_matches(b"c"));
        cursor.close();

        let mut cursor = index.open();
        cursor.find(b"").unwrap();
        assert_eq!(cursor.key(), Some(b"a".as_slice()));
        cursor.next().unwrap();
        assert_eq!(cursor.key(), Some(b"c".as_slice()));
    }
}
