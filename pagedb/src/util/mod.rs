pub(crate) mod atomic;

pub mod field;
