//! Configuration for the save engine.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SaveError};

// Top-level save engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub storage: StorageSection,
    pub engine: EngineSection,
    pub compression: CompressionSection,
    pub recovery: RecoverySection,
    pub concurrency: ConcurrencySection,
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    // Root directory for all save files. Resolved paths never escape it.
    pub root_dir: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    // Whether to use memory-mapped I/O for reads.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

// Engine-level save behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    // Whether to write via temp file + rename.
    pub atomic_writes: bool,
    // Whether to snapshot the previous save before replacing it.
    pub create_backups: bool,
    // Number of rotated backups to retain per save file.
    pub max_backups: usize,
    // Abort a save when free space falls below estimated size plus this margin.
    pub free_space_margin: u64,
    // Warn (but proceed) when free space falls below this many bytes.
    pub low_space_warning: u64,
}

/// Compression codec selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    None,
    #[default]
    Lz4,
    Zstd,
}

impl CodecKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CodecKind::None => "none",
            CodecKind::Lz4 => "lz4",
            CodecKind::Zstd => "zstd",
        }
    }
}

// Compression configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSection {
    // Codec: "none", "lz4", or "zstd".
    pub codec: CodecKind,
    // Codec-specific level (zstd only; lz4 has a single fast mode).
    pub level: i32,
    // Payloads smaller than this are stored uncompressed.
    pub min_size_threshold: usize,
    // Skip compression when sampled entropy exceeds this (bits per byte).
    pub entropy_threshold_bits: f64,
    // Number of bytes to sample for the entropy estimate.
    pub entropy_sample_size: usize,
}

// Crash recovery configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    // Whether the manager scans the save root when constructed.
    pub scan_on_startup: bool,
    // Orphaned temp files older than this are garbage collected.
    pub temp_file_max_age_secs: u64,
}

// Concurrency limits for in-flight pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySection {
    // Maximum concurrent save pipelines.
    pub max_saves: usize,
    // Maximum concurrent load pipelines.
    pub max_loads: usize,
    // Default slot acquisition timeout in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./saves"),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            atomic_writes: true,
            create_backups: true,
            max_backups: 5,
            free_space_margin: 16 * 1024 * 1024,  // 16 MB headroom
            low_space_warning: 256 * 1024 * 1024, // 256 MB
        }
    }
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            codec: CodecKind::Lz4,
            level: 3,
            min_size_threshold: 1024, // don't bother below 1 KB
            entropy_threshold_bits: 7.5,
            entropy_sample_size: 64 * 1024,
        }
    }
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            scan_on_startup: true,
            temp_file_max_age_secs: 3600,
        }
    }
}

impl Default for ConcurrencySection {
    fn default() -> Self {
        Self {
            max_saves: 2,
            max_loads: 4,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl ConcurrencySection {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl FromStr for SaveConfig {
    type Err = SaveError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| SaveError::config_with_source("failed to parse TOML config", e))
    }
}

impl SaveConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SaveError::storage_with_source(path, "failed to read config file", e))?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `SAVE_` and use underscores to separate
    // nested fields. For example:
    // - `SAVE_STORAGE_ROOT_DIR` overrides `storage.root_dir`
    // - `SAVE_COMPRESSION_CODEC` overrides `compression.codec`
    // - `SAVE_CONCURRENCY_MAX_SAVES` overrides `concurrency.max_saves`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SAVE_STORAGE_ROOT_DIR") {
            self.storage.root_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SAVE_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("SAVE_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }
        if let Ok(val) = std::env::var("SAVE_STORAGE_MMAP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.storage.mmap_threshold = v;
            }
        }

        if let Ok(val) = std::env::var("SAVE_ENGINE_ATOMIC_WRITES") {
            if let Ok(v) = val.parse() {
                self.engine.atomic_writes = v;
            }
        }
        if let Ok(val) = std::env::var("SAVE_ENGINE_CREATE_BACKUPS") {
            if let Ok(v) = val.parse() {
                self.engine.create_backups = v;
            }
        }
        if let Ok(val) = std::env::var("SAVE_ENGINE_MAX_BACKUPS") {
            if let Ok(v) = val.parse() {
                self.engine.max_backups = v;
            }
        }

        if let Ok(val) = std::env::var("SAVE_COMPRESSION_CODEC") {
            match val.to_lowercase().as_str() {
                "none" => self.compression.codec = CodecKind::None,
                "lz4" => self.compression.codec = CodecKind::Lz4,
                "zstd" => self.compression.codec = CodecKind::Zstd,
                _ => {} // ignore invalid values
            }
        }
        if let Ok(val) = std::env::var("SAVE_COMPRESSION_LEVEL") {
            if let Ok(v) = val.parse() {
                self.compression.level = v;
            }
        }
        if let Ok(val) = std::env::var("SAVE_COMPRESSION_MIN_SIZE_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.compression.min_size_threshold = v;
            }
        }

        if let Ok(val) = std::env::var("SAVE_RECOVERY_SCAN_ON_STARTUP") {
            if let Ok(v) = val.parse() {
                self.recovery.scan_on_startup = v;
            }
        }
        if let Ok(val) = std::env::var("SAVE_RECOVERY_TEMP_FILE_MAX_AGE_SECS") {
            if let Ok(v) = val.parse() {
                self.recovery.temp_file_max_age_secs = v;
            }
        }

        if let Ok(val) = std::env::var("SAVE_CONCURRENCY_MAX_SAVES") {
            if let Ok(v) = val.parse() {
                self.concurrency.max_saves = v;
            }
        }
        if let Ok(val) = std::env::var("SAVE_CONCURRENCY_MAX_LOADS") {
            if let Ok(v) = val.parse() {
                self.concurrency.max_loads = v;
            }
        }
        if let Ok(val) = std::env::var("SAVE_CONCURRENCY_ACQUIRE_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.concurrency.acquire_timeout_ms = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(SaveError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        if self.engine.create_backups && self.engine.max_backups == 0 {
            return Err(SaveError::config(
                "engine.max_backups must be greater than 0 when backups are enabled",
            ));
        }

        if !(0.0..=8.0).contains(&self.compression.entropy_threshold_bits) {
            return Err(SaveError::config(
                "compression.entropy_threshold_bits must be between 0 and 8",
            ));
        }
        if self.compression.entropy_sample_size == 0 {
            return Err(SaveError::config(
                "compression.entropy_sample_size must be greater than 0",
            ));
        }
        if self.compression.codec == CodecKind::Zstd
            && !(1..=21).contains(&self.compression.level)
        {
            return Err(SaveError::config(
                "compression.level must be between 1 and 21 for zstd",
            ));
        }

        if self.concurrency.max_saves == 0 {
            return Err(SaveError::config(
                "concurrency.max_saves must be greater than 0",
            ));
        }
        if self.concurrency.max_loads == 0 {
            return Err(SaveError::config(
                "concurrency.max_loads must be greater than 0",
            ));
        }

        Ok(())
    }
}
