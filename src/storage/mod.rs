//! Storage abstraction for the save engine.
//!
//! All file I/O performed by the engine flows through the [`StorageBackend`]
//! trait so tests can substitute failure-injecting backends and the atomic
//! write discipline lives in one place.

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{ObjectMeta, StorageBackend, StorageReader, StorageWriter};
