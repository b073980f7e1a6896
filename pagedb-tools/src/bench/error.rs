use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error(transparent)]
    Store(#[from] pagedb::Error),
    #[error(transparent)]
    PageStore(#[from] pagedb::page_store::Error),
    #[error("invalid benchmark {0:?}")]
    Benchmark(String),
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;
