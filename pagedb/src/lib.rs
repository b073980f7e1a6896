//! An embedded store of objects and sorted indexes in a single paged file.
//!
//! The store is built in layers:
//!
//! - [`page_store`]: fixed-size pages with reference-counted acquisition,
//!   a small metadata region, and atomic commits through a write-ahead log
//!   that is replayed on open after a crash.
//! - [`object_store`]: variable-length objects packed into pages, placed
//!   with the help of a free-space map kept on every 8192nd page.
//! - [`Store`]: objects addressed by stable [`ObjectId`]s and named
//!   [`Index`]es of byte-string keys, read through a [`Cursor`].
//!
//! All multi-byte values on disk are big-endian.

pub mod page;
pub mod page_store;
pub use page_store::PageStoreOptions;
pub mod object_store;
pub mod util;

mod error;
pub use error::{Error, ErrorKind, Result};

mod object_id;
pub use object_id::ObjectId;

mod index;
pub use index::{Cursor, Index, MAX_KEY_LEN, MAX_VALUE_LEN};

mod store;
pub use store::{Store, StoreOptions, FIRST_USER_AREA};
