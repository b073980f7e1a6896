use std::{error::Error as StdError, fmt};

use thiserror::Error;

use crate::page_store::{Error as PageError, ErrorKind as PageErrorKind};

/// A list of possible failures of an object store.
#[derive(Error, Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    #[error("Object store failure")]
    Generic,
    #[error("Internal object store failure")]
    Internal,
    #[error("Error creating object store")]
    StoreCreate,
    #[error("Error opening object store")]
    StoreOpen,
    #[error("Error closing object store")]
    StoreClose,
    #[error("Object store format cannot be converted")]
    StoreConversion,
    #[error("Error reading page")]
    PageRead,
    #[error("Error writing page")]
    PageWrite,
    #[error("No vacant page available")]
    PageVacancy,
    #[error("Unexpected object type")]
    ObjectType,
    #[error("Object is too large")]
    ObjectSize,
    #[error("Object does not exist")]
    ObjectExistence,
    #[error("Malformed object header")]
    ObjectHeader,
    #[error("Error inserting object")]
    ObjectInsert,
    #[error("Error removing object")]
    ObjectRemove,
    #[error("Error updating object")]
    ObjectUpdate,
    #[error("Object is locked")]
    ObjectLocked,
    #[error("Invalid metadata request")]
    MetadataRequest,
}

/// An error returned by an object store.
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

impl From<PageError> for Error {
    fn from(err: PageError) -> Self {
        let kind = match err.kind() {
            PageErrorKind::Generic => ErrorKind::Generic,
            PageErrorKind::Create => ErrorKind::StoreCreate,
            PageErrorKind::Open | PageErrorKind::Length => ErrorKind::StoreOpen,
            PageErrorKind::Close => ErrorKind::StoreClose,
            PageErrorKind::Conversion => ErrorKind::StoreConversion,
            PageErrorKind::MetadataRequest => ErrorKind::MetadataRequest,
            PageErrorKind::Integrity => ErrorKind::Internal,
            PageErrorKind::Read | PageErrorKind::LogOpen | PageErrorKind::LogRead => {
                ErrorKind::PageRead
            }
            PageErrorKind::Write
            | PageErrorKind::Commit
            | PageErrorKind::LogCreate
            | PageErrorKind::LogWrite => ErrorKind::PageWrite,
        };
        Self::with_source(kind, err)
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

/// A specialized [`Result`] type returned by an object store.
pub type Result<T, E = Error> = std::result::Result<T, E>;
