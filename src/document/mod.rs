//! Save document format and canonical codec.
//!
//! The on-disk format is:
//! ```text
//! +--------------------------+
//! | Header Length (4 bytes)  |  <- u32 little-endian
//! +--------------------------+
//! | Header (bincode)         |  <- DocumentHeader
//! +--------------------------+
//! | Block Section            |  <- canonical encoding, optionally
//! |                          |     compressed per the header
//! +--------------------------+
//! ```
//!
//! The block section holds one record per registered system, sorted by
//! system name with fixed-width little-endian framing, so identical logical
//! state always produces identical bytes. The header's `overall_checksum`
//! covers the *uncompressed* block section; each block additionally carries
//! its own checksum over its name, schema version, and payload.

mod encode;
mod format;

pub use encode::{
    decode_blocks, encode_blocks, parse_document, peek_header, section_is_truncated,
    write_document, HEADER_LEN_SIZE,
};
pub use format::{DocumentHeader, SaveDocument, SystemBlock, FORMAT_VERSION, MAGIC};
