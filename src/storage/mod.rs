//! Object byte storage

mod filesystem;

pub use filesystem::{ByteRange, FsStore, ObjectStream, StorageError};
