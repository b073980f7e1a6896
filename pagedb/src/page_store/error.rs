use std::{error::Error as StdError, fmt};

use thiserror::Error;

/// A list of possible failures of a page store.
#[derive(Error, Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    #[error("Page store failure")]
    Generic,
    #[error("Error creating page store")]
    Create,
    #[error("Error opening page store")]
    Open,
    #[error("Error closing page store")]
    Close,
    #[error("Error reading page store length")]
    Length,
    #[error("Error reading page")]
    Read,
    #[error("Error writing page")]
    Write,
    #[error("Error committing page store")]
    Commit,
    #[error("Page store integrity failure")]
    Integrity,
    #[error("Invalid metadata request")]
    MetadataRequest,
    #[error("Page store format cannot be converted")]
    Conversion,
    #[error("Error creating log file")]
    LogCreate,
    #[error("Error opening log file")]
    LogOpen,
    #[error("Error reading log file")]
    LogRead,
    #[error("Error writing log file")]
    LogWrite,
}

/// An error returned by a page store.
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

/// A specialized [`Result`] type returned by a page store.
pub type Result<T, E = Error> = std::result::Result<T, E>;
