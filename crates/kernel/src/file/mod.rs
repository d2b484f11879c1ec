//! Media file handling for upload-backed properties.

pub mod storage;

pub use storage::{LocalMediaFileSystem, MediaFileSystem};
