//! Structural and semantic validation of save documents.
//!
//! Structural checks look at framing metadata (magic, version, checksums,
//! expected systems). Semantic checks come from the registered systems and
//! are appended to the same report. Reports are cached by
//! `(path, overall_checksum)` so re-validating an unchanged file is free.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::checksum::Digest;
use crate::document::SaveDocument;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// One validation finding.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Stable machine-readable code, e.g. "bad_magic", "unknown_system".
    pub code: &'static str,
    pub message: String,
}

impl ValidationIssue {
    pub fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
        }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
        }
    }

    pub fn critical(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Critical,
            code,
            message: message.into(),
        }
    }
}

/// Outcome of validating one document.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Valid means no issues at `Error` severity or above.
    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity >= Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    /// First error-or-worse message, for compact error surfaces.
    pub fn first_error(&self) -> Option<&str> {
        self.issues
            .iter()
            .find(|i| i.severity >= Severity::Error)
            .map(|i| i.message.as_str())
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: Vec<ValidationIssue>) {
        self.issues.extend(issues);
    }
}

/// Validation cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Default)]
struct Cache {
    reports: HashMap<(PathBuf, Digest), ValidationReport>,
    hits: u64,
    misses: u64,
}

/// Runs structural checks and caches completed reports.
#[derive(Default)]
pub struct ValidationEngine {
    cache: Mutex<Cache>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Structural checks against the document and the engine's view of the
    /// registered systems (`name -> current schema version`).
    ///
    /// Semantic per-system findings are appended by the caller via
    /// [`ValidationReport::extend`]; this keeps the engine free of any
    /// dependency on the system trait.
    pub fn validate_document(
        &self,
        doc: &SaveDocument,
        registered: &HashMap<String, u32>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        if !doc.header.validate_magic() {
            report.push(ValidationIssue::critical(
                "bad_magic",
                "header magic bytes do not identify a save document",
            ));
        }
        if !doc.header.validate_version() {
            report.push(ValidationIssue::critical(
                "bad_format_version",
                format!("unsupported format version {}", doc.header.format_version),
            ));
        }

        for block in &doc.blocks {
            if !block.checksum_ok() {
                report.push(ValidationIssue::critical(
                    "block_checksum_mismatch",
                    format!("payload of system '{}' fails its checksum", block.system_name),
                ));
            }
            match registered.get(&block.system_name) {
                None => report.push(ValidationIssue::warning(
                    "unknown_system",
                    format!("no registered system named '{}'", block.system_name),
                )),
                Some(&current) if block.schema_version > current => {
                    report.push(ValidationIssue::error(
                        "schema_from_future",
                        format!(
                            "system '{}' was saved with schema v{} but v{} is current",
                            block.system_name, block.schema_version, current
                        ),
                    ));
                }
                Some(_) => {}
            }
        }

        for name in registered.keys() {
            if doc.block(name).is_none() && !doc.header.is_delta {
                report.push(ValidationIssue::warning(
                    "missing_system",
                    format!("registered system '{name}' has no block in this document"),
                ));
            }
        }

        report
    }

    /// Cached report for `(path, checksum)`, bumping hit/miss counters.
    pub fn cached(&self, path: &Path, checksum: &Digest) -> Option<ValidationReport> {
        let mut cache = match self.cache.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        match cache.reports.get(&(path.to_path_buf(), *checksum)).cloned() {
            Some(report) => {
                cache.hits += 1;
                Some(report)
            }
            None => {
                cache.misses += 1;
                None
            }
        }
    }

    /// Stores a completed report. Called explicitly after validation, never
    /// as a side effect of a lookup.
    pub fn store(&self, path: &Path, checksum: Digest, report: ValidationReport) {
        let mut cache = match self.cache.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.reports.insert((path.to_path_buf(), checksum), report);
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = match self.cache.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        CacheStats {
            hits: cache.hits,
            misses: cache.misses,
            entries: cache.reports.len(),
        }
    }
}
