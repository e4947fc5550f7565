//! The save manager: orchestrates the full save/load pipeline.
//!
//! A save runs through fixed phases: plan, serialize, encode, compress,
//! space check, backup, write, publish. Cancellation is honored at phase
//! boundaries only, and the canonical file is replaced by a single atomic
//! rename, so readers observe either the old save or the new one and never
//! a partial write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::checksum::Digest;
use crate::compress::Compressor;
use crate::config::{CodecKind, CompressionSection, SaveConfig};
use crate::document::{
    decode_blocks, encode_blocks, parse_document, peek_header, write_document, DocumentHeader,
    SaveDocument, SystemBlock,
};
use crate::error::{Result, SaveError};
use crate::gate::{ConcurrencyGate, OperationKind};
use crate::migrate::MigrationRegistry;
use crate::path::PathResolver;
use crate::progress::{ProgressSnapshot, SaveProgress};
use crate::recovery::{
    temp_path, BackupEntry, RecoveryAction, RecoveryManager, RecoveryStats, ScanEntry, ScanStatus,
    TEMP_SUFFIX,
};
use crate::storage::{LocalStorage, StorageBackend};
use crate::system::Saveable;
use crate::tracker::{IncrementalTracker, SavePlan, TrackerPolicy};
use crate::validate::{CacheStats, ValidationEngine, ValidationReport};

/// Per-call options for [`SaveManager::save_game`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Serialize every system even when a delta would suffice.
    pub force_full: bool,
    /// Codec override for this save only.
    pub compression: Option<CodecKind>,
    /// Backup-before-replace override for this save only.
    pub create_backup: Option<bool>,
    /// Slot acquisition timeout override. Zero means fail fast with `Busy`.
    pub timeout: Option<Duration>,
}

/// Outcome of a completed save.
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub name: String,
    pub path: PathBuf,
    pub bytes_written: u64,
    pub checksum: Digest,
    pub compressed: bool,
    pub is_delta: bool,
    /// Nothing was dirty; no file was touched.
    pub skipped: bool,
    pub systems_saved: Vec<String>,
    pub duration: Duration,
    /// The save succeeded but the volume is running low on space.
    pub low_space: bool,
}

/// Outcome of a completed load.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub name: String,
    pub path: PathBuf,
    pub created_at_ms: i64,
    pub was_delta: bool,
    pub systems_loaded: Vec<String>,
    pub migrations_applied: usize,
    pub validation: ValidationReport,
    /// The primary was corrupted and a backup was restored first.
    pub restored_from_backup: bool,
}

/// Listing entry for one save file.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at_ms: i64,
    pub checksum: Digest,
    pub compressed: bool,
    pub is_delta: bool,
}

/// Pending migrations for one system in a save file.
#[derive(Debug, Clone)]
pub struct MigrationPreview {
    pub system: String,
    pub from_version: u32,
    pub to_version: u32,
    pub steps: Vec<String>,
}

/// Outcome of a crash recovery pass.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub scanned: Vec<ScanEntry>,
    pub actions: Vec<RecoveryAction>,
    pub temp_files_removed: usize,
}

/// Lifetime counters, plus cache and recovery snapshots.
#[derive(Debug, Clone)]
pub struct SaveStats {
    pub saves_completed: u64,
    pub saves_failed: u64,
    pub loads_completed: u64,
    pub loads_failed: u64,
    pub bytes_written: u64,
    pub migrations_performed: u64,
    pub validation_cache: CacheStats,
    pub recovery: RecoveryStats,
}

#[derive(Default)]
struct Counters {
    saves_completed: AtomicU64,
    saves_failed: AtomicU64,
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
    bytes_written: AtomicU64,
    migrations_performed: AtomicU64,
}

type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Orchestrates saves, loads, validation, migration, and recovery for a set
/// of registered systems.
pub struct SaveManager {
    config: SaveConfig,
    storage: Arc<dyn StorageBackend>,
    resolver: PathResolver,
    compressor: Compressor,
    gate: ConcurrencyGate,
    validation: ValidationEngine,
    recovery: RecoveryManager,
    systems: Mutex<HashMap<String, Arc<dyn Saveable>>>,
    migrations: Mutex<MigrationRegistry>,
    tracker: Mutex<IncrementalTracker>,
    subscribers: Mutex<Vec<ProgressCallback>>,
    counters: Counters,
}

impl SaveManager {
    /// Builds a manager over local storage rooted at `config.storage.root_dir`.
    ///
    /// When `recovery.scan_on_startup` is set, the save root is scanned for
    /// corrupted files and stale temp files before the manager is returned.
    pub fn new(config: SaveConfig) -> Result<Self> {
        config.validate()?;
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.storage)?);
        Self::with_storage(config, storage)
    }

    /// Builds a manager over a caller-supplied backend.
    pub fn with_storage(config: SaveConfig, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;
        // Work with an absolute root so resolved paths pass through the
        // backend unchanged.
        let root = if config.storage.root_dir.is_absolute() {
            config.storage.root_dir.clone()
        } else {
            std::env::current_dir()
                .map_err(|e| {
                    SaveError::storage_with_source(
                        &config.storage.root_dir,
                        "cannot resolve relative save root",
                        e,
                    )
                })?
                .join(&config.storage.root_dir)
        };
        let recovery = RecoveryManager::new(
            Arc::clone(&storage),
            root.clone(),
            config.recovery.clone(),
            config.engine.clone(),
        );

        let manager = Self {
            resolver: PathResolver::new(root),
            compressor: Compressor::new(&config.compression),
            gate: ConcurrencyGate::new(config.concurrency.max_saves, config.concurrency.max_loads),
            validation: ValidationEngine::new(),
            recovery,
            systems: Mutex::new(HashMap::new()),
            migrations: Mutex::new(MigrationRegistry::new()),
            tracker: Mutex::new(IncrementalTracker::new(TrackerPolicy::default())),
            subscribers: Mutex::new(Vec::new()),
            counters: Counters::default(),
            storage,
            config,
        };

        if manager.config.recovery.scan_on_startup {
            let entries = manager.recovery.scan()?;
            let corrupted = entries
                .iter()
                .filter(|e| e.status != ScanStatus::Ok)
                .count();
            let removed = manager.recovery.cleanup_temp_files()?;
            tracing::info!(
                saves = entries.len(),
                corrupted,
                temp_files_removed = removed,
                "startup scan complete"
            );
        }

        Ok(manager)
    }

    /// Registers a system and its migration steps.
    pub fn register_system(&self, system: Arc<dyn Saveable>) -> Result<()> {
        let name = system.system_name().to_string();
        let steps = system.migration_steps();
        {
            let mut migrations = lock(&self.migrations);
            migrations.register_all(&name, steps)?;
        }
        lock(&self.tracker).register(name.clone());
        lock(&self.systems).insert(name, system);
        Ok(())
    }

    /// Marks a system's state as changed since the last save.
    pub fn mark_dirty(&self, system: &str) {
        lock(&self.tracker).mark_dirty(system);
    }

    /// Whether autosave policy says a save is due, and the trigger reason.
    ///
    /// The engine never schedules saves on its own; the host loop polls
    /// this and calls [`SaveManager::save_game`] when it answers.
    pub fn should_autosave(&self) -> Option<&'static str> {
        lock(&self.tracker).should_save()
    }

    /// Registers a callback invoked on every progress change.
    pub fn subscribe_progress(&self, callback: impl Fn(ProgressSnapshot) + Send + Sync + 'static) {
        lock(&self.subscribers).push(Arc::new(callback));
    }

    /// Saves current state under `name`.
    pub fn save_game(&self, name: &str, options: SaveOptions) -> Result<SaveReport> {
        self.save_game_with_progress(name, options, SaveProgress::new())
    }

    /// Saves with a caller-held progress handle, which the caller may use to
    /// observe percentage and to request cancellation from another thread.
    pub fn save_game_with_progress(
        &self,
        name: &str,
        options: SaveOptions,
        progress: Arc<SaveProgress>,
    ) -> Result<SaveReport> {
        let started = Instant::now();
        let path = self.resolver.resolve(name)?;
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.concurrency.acquire_timeout());
        // Guard released on every exit path, error or not.
        let _slot = self.gate.acquire(OperationKind::Save, timeout)?;

        let result = self.run_save(name, &path, &options, &progress, started);
        match &result {
            Ok(report) => {
                if !report.skipped {
                    self.counters.saves_completed.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .bytes_written
                        .fetch_add(report.bytes_written, Ordering::Relaxed);
                }
                progress.mark_complete();
                self.notify(&progress);
            }
            Err(err) => {
                self.counters.saves_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(name, error = %err, "save failed");
                // Never leave a stale temp file behind on failure.
                let temp = temp_path(&path);
                if self.storage.exists(&temp).unwrap_or(false) {
                    let _ = self.storage.delete(&temp);
                }
            }
        }
        result
    }

    fn run_save(
        &self,
        name: &str,
        path: &Path,
        options: &SaveOptions,
        progress: &Arc<SaveProgress>,
        started: Instant,
    ) -> Result<SaveReport> {
        self.update_progress(progress, 5.0, "planning save");
        let plan = {
            let tracker = lock(&self.tracker);
            tracker.plan_save(options.force_full)
        };

        // A delta needs an intact full base on disk; fall back to a full
        // save when the current primary is absent or itself a delta.
        let (plan, base_checksum) = match plan {
            SavePlan::Delta { systems } => match self.delta_base(path)? {
                Some(base) => (SavePlan::Delta { systems }, Some(base)),
                None => (SavePlan::Full, None),
            },
            other => (other, None),
        };

        let block_names = match &plan {
            SavePlan::Skip => {
                tracing::debug!(name, "nothing dirty, skipping save");
                return Ok(SaveReport {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                    bytes_written: 0,
                    checksum: Digest::compute(b""),
                    compressed: false,
                    is_delta: false,
                    skipped: true,
                    systems_saved: Vec::new(),
                    duration: started.elapsed(),
                    low_space: false,
                });
            }
            SavePlan::Full => {
                let systems = lock(&self.systems);
                let mut names: Vec<String> = systems.keys().cloned().collect();
                names.sort();
                names
            }
            SavePlan::Delta { systems } => systems.clone(),
        };
        let is_delta = base_checksum.is_some();
        self.check_cancel(progress, "planning")?;

        self.update_progress(progress, 25.0, "serializing systems");
        let mut blocks = Vec::with_capacity(block_names.len());
        {
            let systems = lock(&self.systems);
            for block_name in &block_names {
                let system = systems.get(block_name).ok_or_else(|| {
                    SaveError::serialization(format!("system '{block_name}' is not registered"))
                })?;
                let payload = system.serialize()?;
                blocks.push(SystemBlock::new(
                    block_name.clone(),
                    system.schema_version(),
                    payload,
                ));
            }
        }
        self.check_cancel(progress, "serialization")?;

        self.update_progress(progress, 50.0, "encoding and compressing");
        let section = encode_blocks(&blocks);
        let overall_checksum = Digest::compute(&section);
        let compressor = match options.compression {
            Some(codec) => Compressor::new(&CompressionSection {
                codec,
                ..self.config.compression.clone()
            }),
            None => self.compressor.clone(),
        };
        let (body, compressed) = compressor.maybe_compress(&section)?;
        let header = match base_checksum {
            Some(base) => {
                DocumentHeader::new_delta(overall_checksum, compressed, compressor.codec(), base)
            }
            None => DocumentHeader::new(overall_checksum, compressed, compressor.codec()),
        };
        let bytes = write_document(&header, &body)?;
        self.check_cancel(progress, "compression")?;

        self.update_progress(progress, 60.0, "checking disk space");
        let required = bytes.len() as u64 + self.config.engine.free_space_margin;
        let available = self.storage.available_space(self.resolver.root())?;
        if available < required {
            return Err(SaveError::OutOfSpace {
                path: path.to_path_buf(),
                required,
                available,
            });
        }
        let low_space = available < self.config.engine.low_space_warning;
        if low_space {
            tracing::warn!(available, "disk space is running low");
        }

        // A delta is unreadable without its base, so the base must enter the
        // backup rotation even when per-call options say no backup.
        let backup = options
            .create_backup
            .unwrap_or(self.config.engine.create_backups)
            || is_delta;
        if backup {
            self.update_progress(progress, 70.0, "rotating backups");
            self.recovery.rotate_backups(path)?;
        }
        self.check_cancel(progress, "backup")?;

        self.update_progress(progress, 90.0, "writing save file");
        if self.config.engine.atomic_writes {
            let temp = temp_path(path);
            self.storage.write_all(&temp, &bytes)?;
            self.storage.rename(&temp, path)?;
        } else {
            self.storage.write_all(path, &bytes)?;
        }

        {
            let mut tracker = lock(&self.tracker);
            if is_delta {
                for block_name in &block_names {
                    tracker.mark_clean(block_name);
                }
            } else {
                tracker.mark_all_clean();
            }
        }

        tracing::info!(
            name,
            bytes = bytes.len(),
            compressed,
            is_delta,
            checksum = %overall_checksum.short_hex(),
            "save complete"
        );
        Ok(SaveReport {
            name: name.to_string(),
            path: path.to_path_buf(),
            bytes_written: bytes.len() as u64,
            checksum: overall_checksum,
            compressed,
            is_delta,
            skipped: false,
            systems_saved: block_names,
            duration: started.elapsed(),
            low_space,
        })
    }

    /// Checksum of the current primary, when it exists and is a full save.
    fn delta_base(&self, path: &Path) -> Result<Option<Digest>> {
        if !self.storage.exists(path)? {
            return Ok(None);
        }
        let prefix = self.read_prefix(path)?;
        match peek_header(&prefix) {
            Ok(header) if !header.is_delta => Ok(Some(header.overall_checksum)),
            // Chained deltas are not supported; an unreadable primary also
            // forces a full save.
            _ => Ok(None),
        }
    }

    /// Loads the save under `name` and hands each block to its system.
    pub fn load_game(&self, name: &str) -> Result<LoadedDocument> {
        let path = self.resolver.resolve(name)?;
        let _slot = self
            .gate
            .acquire(OperationKind::Load, self.config.concurrency.acquire_timeout())?;

        let result = self.run_load(name, &path);
        match &result {
            Ok(_) => {
                self.counters.loads_completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters.loads_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(name, error = %err, "load failed");
            }
        }
        result
    }

    fn run_load(&self, name: &str, path: &Path) -> Result<LoadedDocument> {
        let (doc, restored_from_backup) = self.read_document_with_recovery(path)?;
        let was_delta = doc.header.is_delta;
        let created_at_ms = doc.header.created_at_ms;

        // A delta only carries changed blocks; overlay them on the base.
        let blocks = if doc.header.is_delta {
            let base_checksum = doc.header.base_checksum.ok_or_else(|| {
                SaveError::corruption("delta document is missing its base checksum")
            })?;
            let base = self.find_base(&base_checksum)?;
            base.apply_delta(&doc)
        } else {
            doc.blocks.clone()
        };
        let doc = SaveDocument {
            header: doc.header,
            blocks,
        };

        let validation = self.validate_resolved(path, &doc);
        if !validation.is_valid() {
            return Err(SaveError::ValidationFailed {
                error_count: validation.error_count(),
                first_error: validation
                    .first_error()
                    .unwrap_or("unspecified validation failure")
                    .to_string(),
            });
        }

        let systems = lock(&self.systems);
        let mut systems_loaded = Vec::new();
        let mut migrations_applied = 0usize;
        // Structural integrity already passed, so one system failing to
        // deserialize does not make the other blocks untrustworthy; restore
        // what restores and report the failures together.
        let mut failures: Vec<String> = Vec::new();
        for block in &doc.blocks {
            let Some(system) = systems.get(&block.system_name) else {
                tracing::warn!(system = %block.system_name, "skipping block with no registered system");
                continue;
            };
            let current = system.schema_version();
            let payload = if block.schema_version < current {
                let migrations = lock(&self.migrations);
                let (migrated, steps) = migrations.apply(
                    &block.system_name,
                    block.payload.clone(),
                    block.schema_version,
                    current,
                )?;
                migrations_applied += steps;
                migrated
            } else {
                block.payload.clone()
            };
            match system.deserialize(&payload, current) {
                Ok(()) => systems_loaded.push(block.system_name.clone()),
                Err(err) => {
                    tracing::warn!(system = %block.system_name, error = %err, "system failed to deserialize");
                    failures.push(format!("system '{}': {err}", block.system_name));
                }
            }
        }
        drop(systems);

        self.counters
            .migrations_performed
            .fetch_add(migrations_applied as u64, Ordering::Relaxed);
        if let Some(first) = failures.first() {
            return Err(SaveError::ValidationFailed {
                error_count: failures.len(),
                first_error: first.clone(),
            });
        }
        tracing::info!(
            name,
            systems = systems_loaded.len(),
            migrations_applied,
            restored_from_backup,
            "load complete"
        );
        Ok(LoadedDocument {
            name: name.to_string(),
            path: path.to_path_buf(),
            created_at_ms,
            was_delta,
            systems_loaded,
            migrations_applied,
            validation,
            restored_from_backup,
        })
    }

    /// Reads and fully verifies a document; on corruption, restores the
    /// newest valid backup once and retries before giving up.
    fn read_document_with_recovery(&self, path: &Path) -> Result<(SaveDocument, bool)> {
        match self.read_document(path) {
            Ok(doc) => Ok((doc, false)),
            Err(err @ SaveError::Corruption { .. }) => {
                tracing::warn!(path = %path.display(), error = %err, "primary corrupted, trying backup");
                if self.recovery.recover_from_backup(path).is_err() {
                    return Err(err);
                }
                let doc = self.read_document(path)?;
                Ok((doc, true))
            }
            Err(err) => Err(err),
        }
    }

    fn read_document(&self, path: &Path) -> Result<SaveDocument> {
        let bytes = self.storage.read_all(path)?;
        let (header, body) = parse_document(&bytes)?;
        let section = Compressor::decompress(body, header.compressed, header.codec)?;
        if !header.overall_checksum.verify(&section) {
            return Err(SaveError::corruption(format!(
                "document checksum mismatch for '{}'",
                path.display()
            )));
        }
        let blocks = decode_blocks(&section)?;
        Ok(SaveDocument { header, blocks })
    }

    /// Locates a full document in the save root (backups included) whose
    /// overall checksum matches; the base of a delta save.
    fn find_base(&self, base_checksum: &Digest) -> Result<SaveDocument> {
        for entry in self.storage.list(self.resolver.root())? {
            if !entry.contains(".sav") || entry.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let candidate = self.resolver.root().join(&entry);
            let Ok(prefix) = self.read_prefix(&candidate) else {
                continue;
            };
            let Ok(header) = peek_header(&prefix) else {
                continue;
            };
            if header.is_delta || header.overall_checksum != *base_checksum {
                continue;
            }
            return self.read_document(&candidate);
        }
        Err(SaveError::MissingBase {
            base_checksum: base_checksum.to_hex(),
        })
    }

    fn read_prefix(&self, path: &Path) -> Result<Vec<u8>> {
        let meta = self.storage.metadata(path)?;
        let len = meta.size.min(4096) as usize;
        let mut reader = self.storage.open_read(path)?;
        reader.read_range(0, len)
    }

    /// Validates the save under `name` without deserializing into systems.
    ///
    /// Reports are cached by `(path, checksum)`; an unchanged file validates
    /// from cache.
    pub fn validate_save(&self, name: &str) -> Result<ValidationReport> {
        let path = self.resolver.resolve(name)?;
        let doc = self.read_document(&path)?;
        Ok(self.validate_resolved(&path, &doc))
    }

    /// Runs structural plus semantic validation and stores the report in the
    /// cache. Cache writes happen here and nowhere else.
    fn validate_resolved(&self, path: &Path, doc: &SaveDocument) -> ValidationReport {
        if let Some(cached) = self.validation.cached(path, &doc.header.overall_checksum) {
            return cached;
        }

        let registered: HashMap<String, u32> = {
            let systems = lock(&self.systems);
            systems
                .iter()
                .map(|(n, s)| (n.clone(), s.schema_version()))
                .collect()
        };
        let mut report = self.validation.validate_document(doc, &registered);

        let systems = lock(&self.systems);
        for block in &doc.blocks {
            if let Some(system) = systems.get(&block.system_name) {
                report.extend(system.validate(&block.payload));
            }
        }
        drop(systems);

        self.validation
            .store(path, doc.header.overall_checksum, report.clone());
        report
    }

    /// Migration steps that loading `name` would run, without running them.
    pub fn migration_preview(&self, name: &str) -> Result<Vec<MigrationPreview>> {
        let path = self.resolver.resolve(name)?;
        let doc = self.read_document(&path)?;

        let systems = lock(&self.systems);
        let migrations = lock(&self.migrations);
        let mut previews = Vec::new();
        for block in &doc.blocks {
            let Some(system) = systems.get(&block.system_name) else {
                continue;
            };
            let current = system.schema_version();
            if block.schema_version >= current {
                continue;
            }
            previews.push(MigrationPreview {
                system: block.system_name.clone(),
                from_version: block.schema_version,
                to_version: current,
                steps: migrations.describe_path(&block.system_name, block.schema_version, current)?,
            });
        }
        Ok(previews)
    }

    /// Lists the save files in the root, newest first.
    pub fn list_saves(&self) -> Result<Vec<SaveInfo>> {
        let root = self.resolver.root();
        if !self.storage.exists(root)? {
            return Ok(Vec::new());
        }

        let mut infos = Vec::new();
        for entry in self.storage.list(root)? {
            if !entry.ends_with(".sav") {
                continue;
            }
            let path = root.join(&entry);
            let meta = self.storage.metadata(&path)?;
            let Ok(prefix) = self.read_prefix(&path) else {
                continue;
            };
            let Ok(header) = peek_header(&prefix) else {
                tracing::warn!(path = %path.display(), "unreadable header, omitting from listing");
                continue;
            };
            infos.push(SaveInfo {
                name: entry.trim_end_matches(".sav").to_string(),
                path,
                size: meta.size,
                created_at_ms: header.created_at_ms,
                checksum: header.overall_checksum,
                compressed: header.compressed,
                is_delta: header.is_delta,
            });
        }
        infos.sort_by_key(|i| std::cmp::Reverse(i.created_at_ms));
        Ok(infos)
    }

    /// Lists the rotated backups of the save under `name`, newest first.
    pub fn list_backups(&self, name: &str) -> Result<Vec<BackupEntry>> {
        let path = self.resolver.resolve(name)?;
        self.recovery.list_backups(&path)
    }

    /// Scans the root, restores every corrupted save that has a usable
    /// backup, and collects stale temp files.
    pub fn recover_from_crash(&self) -> Result<RecoveryReport> {
        let scanned = self.recovery.scan()?;
        let mut actions = Vec::new();
        for entry in &scanned {
            match entry.status {
                ScanStatus::Truncated
                | ScanStatus::ChecksumMismatch => {
                    match self.recovery.recover_from_backup(&entry.path) {
                        Ok(action) => actions.push(action),
                        Err(err) => {
                            tracing::warn!(path = %entry.path.display(), error = %err, "recovery failed")
                        }
                    }
                }
                _ => {}
            }
        }
        let temp_files_removed = self.recovery.cleanup_temp_files()?;
        Ok(RecoveryReport {
            scanned,
            actions,
            temp_files_removed,
        })
    }

    pub fn save_stats(&self) -> SaveStats {
        SaveStats {
            saves_completed: self.counters.saves_completed.load(Ordering::Relaxed),
            saves_failed: self.counters.saves_failed.load(Ordering::Relaxed),
            loads_completed: self.counters.loads_completed.load(Ordering::Relaxed),
            loads_failed: self.counters.loads_failed.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
            migrations_performed: self.counters.migrations_performed.load(Ordering::Relaxed),
            validation_cache: self.validation.cache_stats(),
            recovery: self.recovery.stats(),
        }
    }

    fn update_progress(&self, progress: &Arc<SaveProgress>, pct: f64, operation: &str) {
        progress.update(pct, operation);
        self.notify(progress);
    }

    fn notify(&self, progress: &Arc<SaveProgress>) {
        let snapshot = progress.snapshot();
        // Callbacks run with the subscriber lock released, so an observer
        // may call back into the manager and a slow one cannot stall
        // whoever is registering.
        let subscribers: Vec<ProgressCallback> =
            lock(&self.subscribers).iter().map(Arc::clone).collect();
        for callback in subscribers {
            callback(snapshot.clone());
        }
    }

    fn check_cancel(&self, progress: &Arc<SaveProgress>, phase: &'static str) -> Result<()> {
        if progress.is_cancelled() {
            tracing::info!(phase, "save cancelled");
            return Err(SaveError::Cancelled { phase });
        }
        Ok(())
    }
}

/// Poison-tolerant lock: a panicked holder must not wedge every later save.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
