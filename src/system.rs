//! Contract between the save engine and the game systems it persists.

use crate::error::Result;
use crate::migrate::MigrationStep;
use crate::validate::ValidationIssue;

/// A game system whose state the engine saves and restores.
///
/// Implementations serialize to an opaque byte payload; the engine never
/// inspects payload contents. `deserialize` receives the schema version the
/// payload carries *after* migration, which is always the system's current
/// version by the time it is called.
pub trait Saveable: Send + Sync {
    /// Unique, stable name. Used as the block key on disk.
    fn system_name(&self) -> &str;

    /// Current schema version of this system's payload.
    fn schema_version(&self) -> u32;

    /// Serializes current state at the current schema version.
    fn serialize(&self) -> Result<Vec<u8>>;

    /// Restores state from a payload at `schema_version`.
    fn deserialize(&self, bytes: &[u8], schema_version: u32) -> Result<()>;

    /// Domain-level checks on a payload. Structural checks (checksums,
    /// framing) are the engine's job and never delegated here.
    fn validate(&self, _bytes: &[u8]) -> Vec<ValidationIssue> {
        Vec::new()
    }

    /// Steps for upgrading older payloads of this system.
    fn migration_steps(&self) -> Vec<MigrationStep> {
        Vec::new()
    }
}
