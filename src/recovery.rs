//! Crash recovery: save-root scanning, backup rotation and restoration,
//! and orphaned temp file cleanup.
//!
//! Every recovery action is recorded and logged, never performed silently.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::compress::Compressor;
use crate::config::{EngineSection, RecoverySection};
use crate::document::{decode_blocks, parse_document, section_is_truncated};
use crate::error::{Result, SaveError};
use crate::storage::StorageBackend;

/// Suffix for in-flight atomic writes.
pub const TEMP_SUFFIX: &str = ".tmp";

const BACKUP_INFIX: &str = ".bak.";

/// Structural health of one scanned save file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// Parses cleanly and all checksums match.
    Ok,
    /// File is cut short or its framing does not parse; a backup exists.
    Truncated,
    /// Framing parses but a checksum fails; a backup exists.
    ChecksumMismatch,
    /// Corrupted with no backup to restore from.
    MissingBackup,
}

/// One save file's scan result.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub status: ScanStatus,
}

/// A rotated backup of a save file.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub path: PathBuf,
    /// Rotation index; 1 is the newest.
    pub index: usize,
    pub created_at: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Record of a completed restoration.
#[derive(Debug, Clone)]
pub struct RecoveryAction {
    pub target: PathBuf,
    pub restored_from: PathBuf,
    pub backup_index: usize,
}

/// Counters over the manager's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub scans: u64,
    pub corrupted_found: u64,
    pub recoveries: u64,
    pub temp_files_removed: u64,
}

/// Scans the save root and restores corrupted saves from their backups.
pub struct RecoveryManager {
    storage: Arc<dyn StorageBackend>,
    root: PathBuf,
    recovery: RecoverySection,
    engine: EngineSection,
    scans: AtomicU64,
    corrupted_found: AtomicU64,
    recoveries: AtomicU64,
    temp_files_removed: AtomicU64,
}

impl RecoveryManager {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        root: impl Into<PathBuf>,
        recovery: RecoverySection,
        engine: EngineSection,
    ) -> Self {
        Self {
            storage,
            root: root.into(),
            recovery,
            engine,
            scans: AtomicU64::new(0),
            corrupted_found: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            temp_files_removed: AtomicU64::new(0),
        }
    }

    /// Scans every save file under the root and classifies its health.
    pub fn scan(&self) -> Result<Vec<ScanEntry>> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        if !self.storage.exists(&self.root)? {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for name in self.storage.list(&self.root)? {
            if !name.ends_with(".sav") {
                continue;
            }
            let path = self.root.join(&name);
            let outcome = self.inspect(&path);
            let status = match outcome {
                Inspection::Ok => ScanStatus::Ok,
                Inspection::Truncated | Inspection::ChecksumMismatch
                    if self.list_backups(&path)?.is_empty() =>
                {
                    ScanStatus::MissingBackup
                }
                Inspection::Truncated => ScanStatus::Truncated,
                Inspection::ChecksumMismatch => ScanStatus::ChecksumMismatch,
            };
            if status != ScanStatus::Ok {
                self.corrupted_found.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(path = %path.display(), ?status, "corrupted save file found");
            }
            entries.push(ScanEntry { path, status });
        }
        Ok(entries)
    }

    /// Full structural check: framing, header, checksums.
    fn inspect(&self, path: &Path) -> Inspection {
        let bytes = match self.storage.read_all(path) {
            Ok(b) => b,
            Err(_) => return Inspection::Truncated,
        };
        Self::inspect_bytes(&bytes)
    }

    pub(crate) fn inspect_bytes(bytes: &[u8]) -> Inspection {
        let (header, body) = match parse_document(bytes) {
            Ok(parsed) => parsed,
            Err(_) => return Inspection::Truncated,
        };
        let section = match Compressor::decompress(body, header.compressed, header.codec) {
            Ok(s) => s,
            Err(_) => return Inspection::Truncated,
        };
        // A cut-short body also fails the overall checksum; check the
        // framing lengths first so it still classifies as truncation.
        if section_is_truncated(&section) {
            return Inspection::Truncated;
        }
        if !header.overall_checksum.verify(&section) {
            return Inspection::ChecksumMismatch;
        }
        match decode_blocks(&section) {
            Ok(_) => Inspection::Ok,
            Err(_) => Inspection::ChecksumMismatch,
        }
    }

    /// Lists a save file's rotated backups, newest (index 1) first.
    pub fn list_backups(&self, save_path: &Path) -> Result<Vec<BackupEntry>> {
        let mut backups = Vec::new();
        for index in 1..=self.engine.max_backups {
            let path = backup_path(save_path, index);
            if !self.storage.exists(&path)? {
                continue;
            }
            let meta = self.storage.metadata(&path)?;
            backups.push(BackupEntry {
                path,
                index,
                created_at: meta.modified.map(DateTime::from),
                size: meta.size,
            });
        }
        Ok(backups)
    }

    /// Snapshots the current save into the backup rotation.
    ///
    /// The oldest backup beyond `max_backups` is dropped, the rest shift up
    /// one index, and the primary is copied to index 1.
    pub fn rotate_backups(&self, save_path: &Path) -> Result<()> {
        let max = self.engine.max_backups;
        if max == 0 || !self.storage.exists(save_path)? {
            return Ok(());
        }

        let oldest = backup_path(save_path, max);
        if self.storage.exists(&oldest)? {
            self.storage.delete(&oldest)?;
        }
        for index in (1..max).rev() {
            let from = backup_path(save_path, index);
            if self.storage.exists(&from)? {
                self.storage.rename(&from, &backup_path(save_path, index + 1))?;
            }
        }
        self.storage.copy(save_path, &backup_path(save_path, 1))?;
        Ok(())
    }

    /// Restores `save_path` from its newest structurally valid backup.
    ///
    /// The restore goes through a temp file and rename, so a crash mid-restore
    /// never leaves the primary half-written.
    pub fn recover_from_backup(&self, save_path: &Path) -> Result<RecoveryAction> {
        for backup in self.list_backups(save_path)? {
            if self.inspect(&backup.path) != Inspection::Ok {
                tracing::warn!(
                    backup = %backup.path.display(),
                    "skipping corrupted backup during recovery"
                );
                continue;
            }

            let temp = temp_path(save_path);
            self.storage.copy(&backup.path, &temp)?;
            self.storage.rename(&temp, save_path)?;
            self.recoveries.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                target = %save_path.display(),
                backup = %backup.path.display(),
                "restored save from backup"
            );
            return Ok(RecoveryAction {
                target: save_path.to_path_buf(),
                restored_from: backup.path,
                backup_index: backup.index,
            });
        }

        Err(SaveError::storage(
            save_path,
            "no structurally valid backup available for recovery",
        ))
    }

    /// Deletes orphaned temp files older than the configured maximum age.
    ///
    /// Young temp files are left alone: they may belong to an in-flight save.
    pub fn cleanup_temp_files(&self) -> Result<usize> {
        if !self.storage.exists(&self.root)? {
            return Ok(0);
        }
        let max_age = Duration::from_secs(self.recovery.temp_file_max_age_secs);
        let mut removed = 0;

        for name in self.storage.list(&self.root)? {
            if !name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let path = self.root.join(&name);
            let meta = self.storage.metadata(&path)?;
            let expired = meta
                .modified
                .and_then(|m| m.elapsed().ok())
                .is_some_and(|age| age >= max_age);
            if expired {
                self.storage.delete(&path)?;
                removed += 1;
                tracing::info!(path = %path.display(), "removed orphaned temp file");
            }
        }
        self.temp_files_removed
            .fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats {
            scans: self.scans.load(Ordering::Relaxed),
            corrupted_found: self.corrupted_found.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            temp_files_removed: self.temp_files_removed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inspection {
    Ok,
    Truncated,
    ChecksumMismatch,
}

/// `slot1.sav` -> `slot1.sav.bak.<index>`
pub fn backup_path(save_path: &Path, index: usize) -> PathBuf {
    let mut name = save_path.as_os_str().to_os_string();
    name.push(format!("{BACKUP_INFIX}{index}"));
    PathBuf::from(name)
}

/// `slot1.sav` -> `slot1.sav.tmp`
pub fn temp_path(save_path: &Path) -> PathBuf {
    let mut name = save_path.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}
