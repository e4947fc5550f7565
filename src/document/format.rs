//! Save document header and block types.

use serde::{Deserialize, Serialize};

use crate::checksum::Digest;
use crate::config::CodecKind;

/// Magic bytes identifying a save document.
pub const MAGIC: [u8; 4] = *b"GSAV";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 3;

/// Header for a save document.
///
/// The header carries the integrity and framing metadata needed to decode
/// the block section that follows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHeader {
    /// Magic bytes ("GSAV").
    pub magic: [u8; 4],
    /// On-disk format version.
    pub format_version: u32,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at_ms: i64,
    /// SHA-256 of the uncompressed block section.
    pub overall_checksum: Digest,
    /// Whether the block section is compressed.
    pub compressed: bool,
    /// Codec used when `compressed` is true.
    pub codec: CodecKind,
    /// Whether this document holds only changed blocks.
    pub is_delta: bool,
    /// Checksum of the base document a delta applies to.
    pub base_checksum: Option<Digest>,
}

impl DocumentHeader {
    /// Creates a header for a full (non-delta) document.
    pub fn new(overall_checksum: Digest, compressed: bool, codec: CodecKind) -> Self {
        Self {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            overall_checksum,
            compressed,
            codec,
            is_delta: false,
            base_checksum: None,
        }
    }

    /// Creates a header for a delta document referencing `base_checksum`.
    pub fn new_delta(
        overall_checksum: Digest,
        compressed: bool,
        codec: CodecKind,
        base_checksum: Digest,
    ) -> Self {
        Self {
            is_delta: true,
            base_checksum: Some(base_checksum),
            ..Self::new(overall_checksum, compressed, codec)
        }
    }

    /// Validates the header magic bytes.
    pub fn validate_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Validates the header format version.
    pub fn validate_version(&self) -> bool {
        self.format_version == FORMAT_VERSION
    }
}

/// One named system payload inside a save document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemBlock {
    /// Name of the owning system, unique within a document.
    pub system_name: String,
    /// Schema version the payload was serialized with.
    pub schema_version: u32,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// SHA-256 over the block's name, schema version, and payload.
    pub block_checksum: Digest,
}

impl SystemBlock {
    /// Creates a block, computing its checksum.
    pub fn new(system_name: impl Into<String>, schema_version: u32, payload: Vec<u8>) -> Self {
        let system_name = system_name.into();
        let block_checksum = Self::digest(&system_name, schema_version, &payload);
        Self {
            system_name,
            schema_version,
            payload,
            block_checksum,
        }
    }

    /// Block checksum: covers the name and schema version as well as the
    /// payload, so no field of the record can be altered undetected.
    pub fn digest(system_name: &str, schema_version: u32, payload: &[u8]) -> Digest {
        Digest::compute_parts(&[
            system_name.as_bytes(),
            &schema_version.to_le_bytes(),
            payload,
        ])
    }

    /// True when the stored checksum matches the block's contents.
    pub fn checksum_ok(&self) -> bool {
        Self::digest(&self.system_name, self.schema_version, &self.payload) == self.block_checksum
    }
}

/// An in-memory save document: header plus decoded blocks.
///
/// Built transiently per save and discarded after the atomic write; on load
/// it is reconstructed, migrated, validated, and its blocks handed to the
/// registered systems.
#[derive(Debug, Clone)]
pub struct SaveDocument {
    pub header: DocumentHeader,
    pub blocks: Vec<SystemBlock>,
}

impl SaveDocument {
    /// Looks up a block by system name.
    pub fn block(&self, system_name: &str) -> Option<&SystemBlock> {
        self.blocks.iter().find(|b| b.system_name == system_name)
    }

    /// Overlays `delta`'s blocks onto this (base) document's blocks.
    ///
    /// Blocks present in the delta replace same-named base blocks; base
    /// blocks absent from the delta are kept unchanged. The result is
    /// ordered by system name like any canonical document.
    pub fn apply_delta(&self, delta: &SaveDocument) -> Vec<SystemBlock> {
        let mut merged: Vec<SystemBlock> = self
            .blocks
            .iter()
            .filter(|base| delta.block(&base.system_name).is_none())
            .cloned()
            .collect();
        merged.extend(delta.blocks.iter().cloned());
        merged.sort_by(|a, b| a.system_name.cmp(&b.system_name));
        merged
    }
}
