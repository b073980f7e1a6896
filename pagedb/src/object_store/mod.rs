//! Variable-length objects stored on the object pages of a page store.
//!
//! Objects are placed with the help of the space map: every mutation of an
//! object page records the page's remaining room, and inserts look for the
//! first page whose class guarantees enough of it before extending the
//! file. Whole pages can also be taken out of the object area for index
//! nodes; those are recorded as full so objects never land on them.

use std::path::Path;

use log::{debug, trace};

use crate::{
    page::{
        object_footprint, space_map_page_of, ObjectPageContent, ObjectPageMut, ObjectPageRef,
        PageKind, PageType, SpaceMapRef, MAX_OBJECT_SIZE, OBJECT_PAGE_CAPACITY, PAGE_TYPE,
        SPACE_CLASS_SIZES, SPACE_MAP_INTERVAL,
    },
    page_store::{PageGuard, PageStore, PageStoreOptions, PageStoreStats, METADATA_AREA_SIZE},
};

mod error;
pub use error::{Error, ErrorKind, Result};

mod address;
pub use address::ObjectAddress;

/// A store of variable-length typed objects.
#[derive(Debug)]
pub struct ObjectStore {
    pages: PageStore,
}

impl ObjectStore {
    /// Opens the store at `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, PageStoreOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: PageStoreOptions) -> Result<Self> {
        let pages = PageStore::open_with(path, options)?;
        Ok(Self { pages })
    }

    /// Returns the underlying page store.
    pub fn page_store(&self) -> &PageStore {
        &self.pages
    }

    pub fn stats(&self) -> PageStoreStats {
        self.pages.stats()
    }

    /// Stores an object and returns its address.
    pub fn insert(&self, object_type: u8, data: &[u8]) -> Result<ObjectAddress> {
        check_size(data)?;
        let footprint = object_footprint(data.len());
        let mut from = 1;
        while let Some(number) = self.find_page(from, footprint)? {
            if let Some(address) = self.insert_into(number, object_type, data)? {
                return Ok(address);
            }
            from = number + 1;
        }
        let number = self.extend()?;
        debug!("Allocate page {number} for objects");
        self.insert_into(number, object_type, data)?
            .ok_or_else(|| Error::with_source(ErrorKind::ObjectInsert, format!("page {number}")))
    }

    /// Returns the type and data of an object.
    pub fn get(&self, address: ObjectAddress) -> Result<(u8, Vec<u8>)> {
        let page = self.acquire_object_page(address)?;
        let data = page.read();
        let objects = objects_of(address, &data)?;
        let (object_type, object) = objects
            .get(address.slot())
            .ok_or_else(|| missing(address))?;
        Ok((object_type, object.to_vec()))
    }

    /// Returns the data of an object that must have the given type.
    pub fn get_as(&self, address: ObjectAddress, object_type: u8) -> Result<Vec<u8>> {
        let (found, data) = self.get(address)?;
        if found != object_type {
            return Err(Error::with_source(
                ErrorKind::ObjectType,
                format!("object {address} has type {found}, expected {object_type}"),
            ));
        }
        Ok(data)
    }

    /// Replaces the data of an object, keeping its type.
    ///
    /// The object stays where it is if its page has room for the new data.
    /// Otherwise it moves and the new address is returned.
    pub fn update(&self, address: ObjectAddress, data: &[u8]) -> Result<ObjectAddress> {
        check_size(data)?;
        let page = self.acquire_object_page(address)?;
        let object_type = {
            let buf = page.read();
            let objects = objects_of(address, &buf)?;
            let (object_type, old) = objects
                .get(address.slot())
                .ok_or_else(|| missing(address))?;
            if objects.free_space() + old.len() >= data.len() {
                None
            } else {
                Some(object_type)
            }
        };
        let Some(object_type) = object_type else {
            let updated = ObjectPageMut::new(&mut page.write()).update(address.slot(), data);
            if !updated {
                return Err(Error::with_source(
                    ErrorKind::ObjectUpdate,
                    format!("object {address}"),
                ));
            }
            self.record_free_space(&page)?;
            trace!("Update object {address} in place");
            return Ok(address);
        };
        page.release();

        let moved = self.insert(object_type, data)?;
        self.remove(address)?;
        trace!("Move object {address} to {moved}");
        Ok(moved)
    }

    /// Removes an object.
    pub fn remove(&self, address: ObjectAddress) -> Result<()> {
        let page = self.acquire_object_page(address)?;
        {
            let buf = page.read();
            let objects = objects_of(address, &buf)?;
            if objects.get(address.slot()).is_none() {
                return Err(missing(address));
            }
        }
        {
            let mut buf = page.write();
            let mut objects = ObjectPageMut::new(&mut buf);
            if !objects.remove(address.slot()) {
                return Err(Error::with_source(
                    ErrorKind::ObjectRemove,
                    format!("object {address}"),
                ));
            }
            if objects.view().is_empty() {
                objects.clear();
                trace!("Page {} has no objects left", address.page());
            }
        }
        self.record_free_space(&page)
    }

    /// Takes a whole unallocated page out of the object area.
    ///
    /// The returned page is zeroed apart from its page type.
    pub fn allocate_node_page(&self) -> Result<PageGuard<'_>> {
        let mut from = 1;
        let number = loop {
            match self.find_page(from, SPACE_CLASS_SIZES[0] as usize)? {
                Some(number) => {
                    let page = self.pages.acquire(number)?;
                    let unallocated = PageType::of(&page.read()) == Some(PageType::Unallocated);
                    if unallocated {
                        break number;
                    }
                    from = number + 1;
                }
                None => break self.extend()?,
            }
        };
        let page = self.pages.acquire(number)?;
        {
            let mut buf = page.write();
            buf.fill(0);
            PAGE_TYPE.put_u8(&mut buf, PageType::IndexNode as u8);
        }
        self.pages.set_free_space(number, 0)?;
        debug!("Allocate page {number} for an index node");
        Ok(page)
    }

    /// Returns an index node page to the object area.
    pub fn free_node_page(&self, number: u32) -> Result<()> {
        if !PageKind::of(number).is_object() {
            return Err(Error::with_source(
                ErrorKind::ObjectRemove,
                format!("page {number} is a space-map page"),
            ));
        }
        let page = self.pages.acquire(number)?;
        if PageType::of(&page.read()) != Some(PageType::IndexNode) {
            return Err(Error::with_source(
                ErrorKind::ObjectType,
                format!("page {number} is not an index node"),
            ));
        }
        page.write().fill(0);
        self.pages.set_free_space(number, OBJECT_PAGE_CAPACITY)?;
        debug!("Free index node page {number}");
        Ok(())
    }

    pub fn read_metadata_area(&self, i: usize) -> Result<[u8; METADATA_AREA_SIZE]> {
        Ok(self.pages.read_metadata_area(i)?)
    }

    pub fn write_metadata_area(&self, i: usize, data: &[u8]) -> Result<()> {
        Ok(self.pages.write_metadata_area(i, data)?)
    }

    pub fn commit(&self) -> Result<()> {
        Ok(self.pages.commit()?)
    }

    pub fn rollback(&self) -> Result<()> {
        Ok(self.pages.rollback()?)
    }

    pub fn close(self, commit: bool) {
        self.pages.close(commit)
    }

    fn acquire_object_page(&self, address: ObjectAddress) -> Result<PageGuard<'_>> {
        if !address.is_valid() || address.page() >= self.pages.page_count() {
            return Err(missing(address));
        }
        Ok(self.pages.acquire(address.page())?)
    }

    /// Returns the first existing page at or after `from` whose space-map
    /// class guarantees `min_free` bytes.
    fn find_page(&self, from: u32, min_free: usize) -> Result<Option<u32>> {
        let count = self.pages.page_count();
        let mut map_number = space_map_page_of(from);
        while map_number < count {
            let map = self.pages.acquire(map_number)?;
            let found = SpaceMapRef::new(map_number, &map.read()).find(from, count - 1, min_free);
            if found.is_some() {
                return Ok(found);
            }
            map_number = match map_number.checked_add(SPACE_MAP_INTERVAL) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(None)
    }

    /// Returns the number of a fresh page past the end of the store.
    fn extend(&self) -> Result<u32> {
        let mut number = self.pages.page_count();
        if PageKind::of(number).is_space_map() {
            number = number
                .checked_add(1)
                .ok_or_else(|| Error::new(ErrorKind::PageVacancy))?;
        }
        if number == u32::MAX {
            return Err(Error::new(ErrorKind::PageVacancy));
        }
        Ok(number)
    }

    fn insert_into(
        &self,
        number: u32,
        object_type: u8,
        data: &[u8],
    ) -> Result<Option<ObjectAddress>> {
        let page = self.pages.acquire(number)?;
        let page_type = PageType::of(&page.read());
        match page_type {
            Some(PageType::Objects) => {
                if !ObjectPageRef::new(&page.read()).fits(data.len()) {
                    self.record_free_space(&page)?;
                    return Ok(None);
                }
            }
            Some(PageType::Unallocated) => {}
            Some(PageType::IndexNode) => {
                self.pages.set_free_space(number, 0)?;
                return Ok(None);
            }
            None => {
                return Err(Error::with_source(
                    ErrorKind::ObjectHeader,
                    format!("page {number} has an unknown type"),
                ))
            }
        }
        let slot = {
            let mut buf = page.write();
            let mut objects = ObjectPageMut::new(&mut buf);
            if page_type == Some(PageType::Unallocated) {
                objects.init();
            }
            objects.insert(object_type, data)
        };
        self.record_free_space(&page)?;
        let Some(slot) = slot else {
            return Ok(None);
        };
        let address = ObjectAddress::new(number, slot);
        trace!("Insert object {address} of {} bytes", data.len());
        Ok(Some(address))
    }

    fn record_free_space(&self, page: &PageGuard<'_>) -> Result<()> {
        let free = match ObjectPageContent::materialize(&page.read()) {
            Some(ObjectPageContent::Objects(objects)) => objects.available(),
            Some(ObjectPageContent::Unallocated) => OBJECT_PAGE_CAPACITY,
            _ => 0,
        };
        Ok(self.pages.set_free_space(page.number(), free)?)
    }
}

fn check_size(data: &[u8]) -> Result<()> {
    if data.len() > MAX_OBJECT_SIZE {
        return Err(Error::with_source(
            ErrorKind::ObjectSize,
            format!("{} bytes exceeds {MAX_OBJECT_SIZE}", data.len()),
        ));
    }
    Ok(())
}

fn missing(address: ObjectAddress) -> Error {
    Error::with_source(ErrorKind::ObjectExistence, format!("object {address}"))
}

fn objects_of(address: ObjectAddress, buf: &[u8]) -> Result<ObjectPageRef<'_>> {
    match ObjectPageContent::materialize(buf) {
        Some(ObjectPageContent::Objects(objects)) => Ok(objects),
        Some(_) => Err(missing(address)),
        None => Err(Error::with_source(
            ErrorKind::ObjectHeader,
            format!("page {} has an unknown type", address.page()),
        )),
    }
}
