//! Local filesystem backend.
//!
//! Reads go through buffered I/O below the configured size threshold and a
//! read-only memory map at or above it. Writers sync to disk in `finish`,
//! so the rename that publishes a save file only ever exposes durable bytes.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::traits::{ObjectMeta, StorageBackend, StorageReader, StorageWriter};
use crate::config::StorageSection;
use crate::error::{Result, SaveError};

/// Filesystem backend rooted at the configured save directory.
///
/// Relative paths resolve against the root; absolute paths pass through, so
/// the manager can hand over fully resolved save paths unchanged.
pub struct LocalStorage {
    root: PathBuf,
    buffer_size: usize,
    use_mmap: bool,
    mmap_threshold: u64,
}

impl LocalStorage {
    /// Creates the backend, making the save root directory if needed.
    pub fn new(config: &StorageSection) -> Result<Self> {
        let root = config.root_dir.clone();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| {
                SaveError::storage_with_source(&root, "failed to create save root", e)
            })?;
        }
        Ok(Self {
            root,
            buffer_size: config.buffer_size,
            use_mmap: config.use_mmap,
            mmap_threshold: config.mmap_threshold,
        })
    }

    fn full_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) if !parent.exists() => fs::create_dir_all(parent).map_err(|e| {
                SaveError::storage_with_source(parent, "failed to create parent directory", e)
            }),
            _ => Ok(()),
        }
    }
}

impl StorageBackend for LocalStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.full_path(path).exists())
    }

    fn metadata(&self, path: &Path) -> Result<ObjectMeta> {
        let full = self.full_path(path);
        let meta = fs::metadata(&full)
            .map_err(|e| SaveError::storage_with_source(&full, "failed to read metadata", e))?;
        Ok(ObjectMeta {
            size: meta.len(),
            modified: meta.modified().ok(),
            is_dir: meta.is_dir(),
        })
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let full = self.full_path(path);
        let file = File::open(&full)
            .map_err(|e| SaveError::storage_with_source(&full, "failed to open file", e))?;
        let size = file
            .metadata()
            .map_err(|e| SaveError::storage_with_source(&full, "failed to read file metadata", e))?
            .len();

        let source = if self.use_mmap && size >= self.mmap_threshold {
            // SAFETY: the mapping is read-only and owned by the reader; the
            // engine never writes through a path it is concurrently reading.
            let map = unsafe { Mmap::map(&file) }
                .map_err(|e| SaveError::storage_with_source(&full, "failed to memory-map file", e))?;
            ReadSource::Mapped { map, pos: 0 }
        } else {
            ReadSource::Buffered(BufReader::with_capacity(self.buffer_size, file))
        };
        Ok(Box::new(LocalReader {
            path: full,
            size,
            source,
        }))
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        let full = self.full_path(path);
        Self::ensure_parent(&full)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)
            .map_err(|e| SaveError::storage_with_source(&full, "failed to create file", e))?;
        Ok(Box::new(LocalWriter {
            writer: BufWriter::with_capacity(self.buffer_size, file),
            path: full,
        }))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let full = self.full_path(path);
        let result = if full.is_dir() {
            fs::remove_dir_all(&full)
        } else {
            fs::remove_file(&full)
        };
        result.map_err(|e| SaveError::storage_with_source(&full, "failed to delete", e))
    }

    fn list(&self, prefix: &Path) -> Result<Vec<String>> {
        let full = self.full_path(prefix);
        if !full.exists() {
            return Ok(Vec::new());
        }
        if !full.is_dir() {
            return Err(SaveError::storage(&full, "path is not a directory"));
        }

        let dir = fs::read_dir(&full)
            .map_err(|e| SaveError::storage_with_source(&full, "failed to read directory", e))?;
        let mut names = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| {
                SaveError::storage_with_source(&full, "failed to read directory entry", e)
            })?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = self.full_path(from);
        let to = self.full_path(to);
        Self::ensure_parent(&to)?;
        fs::rename(&from, &to).map_err(|e| {
            SaveError::storage_with_source(
                &from,
                format!("failed to rename to {}", to.display()),
                e,
            )
        })
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let from = self.full_path(from);
        let to = self.full_path(to);
        Self::ensure_parent(&to)?;
        fs::copy(&from, &to).map(|_| ()).map_err(|e| {
            SaveError::storage_with_source(&from, format!("failed to copy to {}", to.display()), e)
        })
    }

    fn available_space(&self, path: &Path) -> Result<u64> {
        let full = self.full_path(path);
        // Walk up to an existing ancestor; statvfs needs a real path.
        let mut ancestor = full.as_path();
        while !ancestor.exists() {
            ancestor = ancestor.parent().ok_or_else(|| {
                SaveError::storage(&full, "no existing ancestor to query free space")
            })?;
        }
        fs2::available_space(ancestor)
            .map_err(|e| SaveError::storage_with_source(ancestor, "failed to query free space", e))
    }
}

enum ReadSource {
    Buffered(BufReader<File>),
    Mapped { map: Mmap, pos: u64 },
}

/// Reader over either a buffered file or a memory map.
struct LocalReader {
    path: PathBuf,
    size: u64,
    source: ReadSource,
}

impl Read for LocalReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.source {
            ReadSource::Buffered(reader) => reader.read(buf),
            ReadSource::Mapped { map, pos } => {
                let start = (*pos).min(map.len() as u64) as usize;
                let n = buf.len().min(map.len() - start);
                buf[..n].copy_from_slice(&map[start..start + n]);
                *pos = (start + n) as u64;
                Ok(n)
            }
        }
    }
}

impl Seek for LocalReader {
    fn seek(&mut self, to: SeekFrom) -> std::io::Result<u64> {
        match &mut self.source {
            ReadSource::Buffered(reader) => reader.seek(to),
            ReadSource::Mapped { map, pos } => {
                let target = match to {
                    SeekFrom::Start(offset) => offset as i128,
                    SeekFrom::End(offset) => map.len() as i128 + offset as i128,
                    SeekFrom::Current(offset) => *pos as i128 + offset as i128,
                };
                if target < 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "seek before start of file",
                    ));
                }
                *pos = target as u64;
                Ok(*pos)
            }
        }
    }
}

impl StorageReader for LocalReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        self.seek(SeekFrom::Start(start)).map_err(|e| {
            SaveError::storage_with_source(&self.path, format!("failed to seek to {start}"), e)
        })?;
        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf).map_err(|e| {
            SaveError::storage_with_source(
                &self.path,
                format!("failed to read {length} bytes at {start}"),
                e,
            )
        })?;
        Ok(buf)
    }
}

struct LocalWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl StorageWriter for LocalWriter {
    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| SaveError::storage_with_source(&self.path, "failed to flush writer", e))?;
        // Durable before the caller renames over the canonical path.
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| SaveError::storage_with_source(&self.path, "failed to sync to disk", e))
    }
}
