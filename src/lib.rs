//! save-core: a durable save engine for versioned, multi-system game state.
//!
//! The engine gathers opaque payloads from registered [`Saveable`] systems
//! into a single canonical document, compresses it when that pays off, and
//! publishes it with an atomic temp-write-rename so the canonical file is
//! never observed half-written. Loads verify every checksum, migrate stale
//! schema versions forward, and fall back to rotated backups when the
//! primary is corrupted.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use save_core::{SaveConfig, SaveManager, SaveOptions};
//!
//! # fn run(system: Arc<dyn save_core::Saveable>) -> save_core::Result<()> {
//! let manager = SaveManager::new(SaveConfig::default())?;
//! manager.register_system(system)?;
//! let report = manager.save_game("slot1", SaveOptions::default())?;
//! println!("wrote {} bytes", report.bytes_written);
//! let restored = manager.load_game("slot1")?;
//! println!("restored {} systems", restored.systems_loaded.len());
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod compress;
pub mod config;
pub mod document;
pub mod error;
pub mod gate;
pub mod manager;
pub mod migrate;
pub mod path;
pub mod progress;
pub mod recovery;
pub mod storage;
pub mod system;
pub mod tracker;
pub mod validate;

pub use checksum::Digest;
pub use config::{CodecKind, SaveConfig};
pub use error::{Result, SaveError};
pub use gate::{ConcurrencyGate, OperationKind, SlotGuard};
pub use manager::{
    LoadedDocument, MigrationPreview, RecoveryReport, SaveInfo, SaveManager, SaveOptions,
    SaveReport, SaveStats,
};
pub use migrate::{MigrationRegistry, MigrationStep};
pub use progress::{ProgressSnapshot, SaveProgress};
pub use recovery::{BackupEntry, RecoveryAction, RecoveryStats, ScanEntry, ScanStatus};
pub use system::Saveable;
pub use tracker::{IncrementalTracker, SavePlan, TrackerPolicy};
pub use validate::{CacheStats, Severity, ValidationIssue, ValidationReport};
