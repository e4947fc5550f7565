use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for the save engine.
///
/// `Timeout` and `Busy` are retryable: the operation never started and the
/// caller may simply try again. Everything else is terminal for the attempt.
#[derive(Error, Debug)]
pub enum SaveError {
    #[error("Invalid save name '{name}': {message}")]
    Security { name: String, message: String },

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Insufficient disk space at '{path}': {required} bytes required, {available} available")]
    OutOfSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("Corruption detected: {message}")]
    Corruption { message: String },

    #[error("No migration path for system '{system}' from version {from} to {to}")]
    NoMigrationPath { system: String, from: u32, to: u32 },

    #[error("Delta save references a missing base document (checksum {base_checksum})")]
    MissingBase { base_checksum: String },

    #[error("Timed out waiting for a {kind} slot after {waited_ms} ms")]
    Timeout { kind: &'static str, waited_ms: u64 },

    #[error("All {kind} slots are in use")]
    Busy { kind: &'static str },

    #[error("Validation failed: {error_count} error(s), first: {first_error}")]
    ValidationFailed {
        error_count: usize,
        first_error: String,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation cancelled during {phase}")]
    Cancelled { phase: &'static str },
}

pub type Result<T> = std::result::Result<T, SaveError>;

// Convenience constructors
impl SaveError {
    pub fn security(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Security {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True when the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Busy { .. })
    }
}
