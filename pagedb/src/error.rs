use std::{error::Error as StdError, fmt};

use thiserror::Error;

use crate::{
    object_store::{Error as ObjectError, ErrorKind as ObjectErrorKind},
    page_store::Error as PageError,
};

/// A list of possible failures of an indexed store.
#[derive(Error, Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    #[error("Entry key is too long")]
    EntryKeyLength,
    #[error("Entry value is too long")]
    EntryValueLength,
    #[error("Entry not removed")]
    EntryNotRemoved,
    #[error("Entry not updated")]
    EntryNotUpdated,
    #[error("Index node not retrieved")]
    IndexNodeNotRetrieved,
    #[error("Index node not stored")]
    IndexNodeNotStored,
    #[error("Index node not split")]
    IndexNodeNotSplit,
    #[error("Index node not created")]
    IndexNodeNotCreated,
    #[error("Index already exists")]
    IndexExists,
    #[error("Index not created")]
    IndexNotCreated,
    #[error("Index not found")]
    IndexNotFound,
    #[error("Index not removed")]
    IndexNotRemoved,
    #[error("Object already exists")]
    ObjectExists,
    #[error("Object not acquired")]
    ObjectNotAcquired,
    #[error("Object not created")]
    ObjectNotCreated,
    #[error("Object not found")]
    ObjectNotFound,
    #[error("Object not released")]
    ObjectNotReleased,
    #[error("Object not removed")]
    ObjectNotRemoved,
    #[error("Object not updated")]
    ObjectNotUpdated,
    #[error("Object not stored")]
    ObjectNotStored,
    #[error("Unexpected object type")]
    ObjectTypeError,
    #[error("Invalid object identifier")]
    ObjectIdInvalid,
    #[error("Store is empty")]
    StoreEmpty,
    #[error("Invalid store format")]
    StoreFormat,
    #[error("Store not created")]
    StoreNotCreated,
    #[error("Store not open")]
    StoreNotOpen,
    #[error("Store not closed")]
    StoreNotClosed,
    #[error("Store not flushed")]
    StoreNotFlushed,
    #[error("Store not opened")]
    StoreNotOpened,
    #[error("Store cannot be read or written")]
    StoreNotReadWrite,
    #[error("Store format cannot be converted")]
    StoreNotConverted,
    #[error("Store is already open")]
    StoreIsOpen,
    #[error("Store not committed")]
    StoreNotCommitted,
    #[error("Store not rolled back")]
    StoreNotRolledBack,
    #[error("Invalid metadata request")]
    MetadataRequest,
}

impl From<ObjectErrorKind> for ErrorKind {
    fn from(kind: ObjectErrorKind) -> Self {
        match kind {
            ObjectErrorKind::StoreCreate => Self::StoreNotCreated,
            ObjectErrorKind::StoreOpen => Self::StoreNotOpened,
            ObjectErrorKind::StoreClose => Self::StoreNotClosed,
            ObjectErrorKind::StoreConversion => Self::StoreNotConverted,
            ObjectErrorKind::MetadataRequest => Self::MetadataRequest,
            ObjectErrorKind::ObjectType => Self::ObjectTypeError,
            ObjectErrorKind::ObjectExistence => Self::ObjectNotFound,
            ObjectErrorKind::ObjectSize | ObjectErrorKind::ObjectInsert => Self::ObjectNotStored,
            ObjectErrorKind::ObjectRemove => Self::ObjectNotRemoved,
            ObjectErrorKind::ObjectUpdate => Self::ObjectNotUpdated,
            ObjectErrorKind::ObjectLocked | ObjectErrorKind::PageRead => Self::ObjectNotAcquired,
            ObjectErrorKind::PageWrite => Self::StoreNotFlushed,
            ObjectErrorKind::PageVacancy => Self::ObjectNotCreated,
            ObjectErrorKind::Internal | ObjectErrorKind::ObjectHeader => Self::StoreFormat,
            ObjectErrorKind::Generic => Self::StoreNotReadWrite,
        }
    }
}

/// An error returned by an indexed store.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<ObjectError> for Error {
    fn from(err: ObjectError) -> Self {
        Self::with_source(err.kind().into(), err)
    }
}

impl From<PageError> for Error {
    fn from(err: PageError) -> Self {
        ObjectError::from(err).into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.kind, source),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// A specialized [`Result`] type returned by an indexed store.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_store::ErrorKind as PageErrorKind;

    #[test]
    fn lower_errors_keep_their_source() {
        let err: Error = ObjectError::new(ObjectErrorKind::ObjectExistence).into();
        assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
        assert_eq!(err.to_string(), "Object not found: Object does not exist");
        assert!(err.source().is_some());

        let err: Error = PageError::new(PageErrorKind::Conversion).into();
        assert_eq!(err.kind(), ErrorKind::StoreNotConverted);
        let object = err.source().unwrap();
        assert!(object.source().is_some());

        let err = Error::new(ErrorKind::IndexExists);
        assert_eq!(err.to_string(), "Index already exists");
        assert!(err.source().is_none());
    }
}
