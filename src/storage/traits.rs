//! Storage backend traits.
//!
//! These traits define the operations the save engine needs from a
//! filesystem-like store. The local filesystem implementation lives in
//! [`super::LocalStorage`]; tests may provide their own implementations.

use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::error::{Result, SaveError};

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Size of the object in bytes.
    pub size: u64,
    /// Last modification time, if available.
    pub modified: Option<std::time::SystemTime>,
    /// Whether this object is a directory.
    pub is_dir: bool,
}

/// A handle for reading from storage.
pub trait StorageReader: Read + Seek + Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;

    /// Reads a range of bytes from the object.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the range is out of bounds.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;
}

/// A handle for writing to storage.
pub trait StorageWriter: Write + Send {
    /// Finishes the write, flushing buffers and syncing to stable storage.
    ///
    /// Must be called to complete the write; a dropped writer makes no
    /// durability promise.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// The core storage backend trait.
///
/// Object-safe; the engine holds it as `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Checks if an object exists at the given path.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Retrieves metadata for an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or metadata cannot be read.
    fn metadata(&self, path: &Path) -> Result<ObjectMeta>;

    /// Opens an object for reading.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Opens an object for writing, truncating any existing content.
    ///
    /// Parent directories are created if they don't exist.
    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;

    /// Deletes an object.
    fn delete(&self, path: &Path) -> Result<()>;

    /// Lists entry names under the given directory, sorted.
    fn list(&self, prefix: &Path) -> Result<Vec<String>>;

    /// Renames an object from one path to another.
    ///
    /// On the same filesystem this is the atomic-replace primitive the
    /// engine's durability contract rests on.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copies an object, replacing any existing destination.
    fn copy(&self, from: &Path, to: &Path) -> Result<()>;

    /// Returns the number of bytes available on the volume holding `path`.
    fn available_space(&self, path: &Path) -> Result<u64>;

    /// Reads an entire object into memory.
    fn read_all(&self, path: &Path) -> Result<Vec<u8>> {
        let mut reader = self.open_read(path)?;
        let mut buf = Vec::with_capacity(reader.size() as usize);
        reader
            .read_to_end(&mut buf)
            .map_err(|e| SaveError::storage_with_source(path, "failed to read object", e))?;
        Ok(buf)
    }

    /// Writes an entire object, completing with a durable `finish`.
    fn write_all(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut writer = self.open_write(path)?;
        writer
            .write_all(bytes)
            .map_err(|e| SaveError::storage_with_source(path, "failed to write object", e))?;
        writer.finish()
    }
}
