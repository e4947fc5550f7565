//! Secure save-name resolution.
//!
//! Save files are addressed by short user-supplied names ("slot1",
//! "autosave_3"). The resolver turns a name into a canonical path inside the
//! configured save root and rejects anything that could escape it.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SaveError};

/// File extension for save documents.
pub const SAVE_EXTENSION: &str = "sav";

/// Maximum accepted save name length, extension included.
pub const MAX_NAME_LEN: usize = 120;

// Windows device names are reserved even with an extension attached.
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Resolves save names to canonical paths under a fixed root directory.
///
/// A pure function of its input and the configured root; trivially
/// thread-safe.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the configured save root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a save name to its canonical absolute path.
    ///
    /// The `.sav` extension is appended when absent. The returned path is
    /// guaranteed to live directly under the save root.
    ///
    /// # Errors
    ///
    /// Returns `SaveError::Security` for empty or overlong names, traversal
    /// sequences, absolute paths, invalid characters, reserved device names,
    /// and names whose resolved target escapes the save root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(SaveError::security(name, "name is empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(SaveError::security(name, "name is too long"));
        }

        if name.contains("..") {
            return Err(SaveError::security(name, "path traversal sequence"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(SaveError::security(name, "path separators not allowed"));
        }

        let candidate = Path::new(name);
        if candidate.is_absolute() || candidate.components().any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(SaveError::security(name, "absolute or non-normal path"));
        }

        if name.chars().any(|c| c.is_control() || c == '\0') {
            return Err(SaveError::security(name, "control character in name"));
        }
        if name.contains(|c: char| matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*')) {
            return Err(SaveError::security(name, "invalid character in name"));
        }
        if name.starts_with('.') || name.ends_with('.') || name.ends_with(' ') {
            return Err(SaveError::security(name, "leading/trailing dot or space"));
        }

        let stem = name
            .split('.')
            .next()
            .unwrap_or(name)
            .to_ascii_lowercase();
        if RESERVED_NAMES.contains(&stem.as_str()) {
            return Err(SaveError::security(name, "reserved device name"));
        }

        let mut resolved = self.root.join(name);
        if resolved.extension().map(|e| e != SAVE_EXTENSION).unwrap_or(true) {
            resolved.set_extension(match resolved.extension() {
                // "slot.v2" becomes "slot.v2.sav", never replacing user text
                Some(ext) => format!("{}.{}", ext.to_string_lossy(), SAVE_EXTENSION),
                None => SAVE_EXTENSION.to_string(),
            });
        }

        self.verify_within_root(&resolved, name)?;
        Ok(resolved)
    }

    /// Symlink-aware escape check: canonicalize what exists of the path and
    /// confirm the result still lives under the (canonicalized) root.
    fn verify_within_root(&self, resolved: &Path, name: &str) -> Result<()> {
        let canonical_root = match self.root.canonicalize() {
            Ok(p) => p,
            // Root not created yet; nothing can have been symlinked inside it.
            Err(_) => return Ok(()),
        };

        // The file itself may not exist yet; canonicalize it if it does,
        // otherwise its parent (which is the root).
        let canonical = if resolved.exists() {
            resolved
                .canonicalize()
                .map_err(|e| SaveError::storage_with_source(resolved, "canonicalization failed", e))?
        } else {
            let parent = resolved.parent().unwrap_or(&self.root);
            let canonical_parent = parent.canonicalize().map_err(|e| {
                SaveError::storage_with_source(parent, "canonicalization failed", e)
            })?;
            canonical_parent.join(resolved.file_name().unwrap_or_default())
        };

        if !canonical.starts_with(&canonical_root) {
            return Err(SaveError::security(name, "resolved path escapes save root"));
        }
        Ok(())
    }
}
