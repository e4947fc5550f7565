//! Canonical encoding and decoding of save documents.
//!
//! Block records use fixed-width little-endian framing and are sorted by
//! system name, so a given set of payloads always encodes to the same bytes.
//! The decoder treats any framing inconsistency as corruption.

use crate::checksum::Digest;
use crate::error::{Result, SaveError};

use super::format::{DocumentHeader, SystemBlock};

/// Size of the header length prefix.
pub const HEADER_LEN_SIZE: usize = 4;

// Defensive bounds; real documents stay far below these.
const MAX_HEADER_LEN: usize = 64 * 1024;
const MAX_BLOCK_NAME_LEN: usize = 256;
const MAX_BLOCK_COUNT: u32 = 10_000;

/// Encodes blocks into the canonical block section.
///
/// Blocks are sorted by system name; each record is
/// `name_len u32 | name | schema_version u32 | payload_len u64 | payload |
/// checksum 32B`, all integers little-endian.
pub fn encode_blocks(blocks: &[SystemBlock]) -> Vec<u8> {
    let mut sorted: Vec<&SystemBlock> = blocks.iter().collect();
    sorted.sort_by(|a, b| a.system_name.cmp(&b.system_name));

    let total: usize = sorted
        .iter()
        .map(|b| 4 + b.system_name.len() + 4 + 8 + b.payload.len() + 32)
        .sum();
    let mut out = Vec::with_capacity(4 + total);

    out.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
    for block in sorted {
        out.extend_from_slice(&(block.system_name.len() as u32).to_le_bytes());
        out.extend_from_slice(block.system_name.as_bytes());
        out.extend_from_slice(&block.schema_version.to_le_bytes());
        out.extend_from_slice(&(block.payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&block.payload);
        out.extend_from_slice(&block.block_checksum.0);
    }
    out
}

/// Decodes the canonical block section, verifying framing and checksums.
///
/// # Errors
///
/// Returns `SaveError::Corruption` on truncation, length mismatches,
/// duplicate or unsorted names, or a block checksum failure.
pub fn decode_blocks(bytes: &[u8]) -> Result<Vec<SystemBlock>> {
    let mut cursor = Cursor::new(bytes);

    let count = cursor.read_u32("block count")?;
    if count > MAX_BLOCK_COUNT {
        return Err(SaveError::corruption(format!(
            "implausible block count {count}"
        )));
    }

    let mut blocks = Vec::with_capacity(count as usize);
    let mut prev_name: Option<String> = None;

    for i in 0..count {
        let name_len = cursor.read_u32("block name length")? as usize;
        if name_len == 0 || name_len > MAX_BLOCK_NAME_LEN {
            return Err(SaveError::corruption(format!(
                "block {i}: invalid name length {name_len}"
            )));
        }
        let name_bytes = cursor.read_bytes(name_len, "block name")?;
        let system_name = String::from_utf8(name_bytes.to_vec())
            .map_err(|_| SaveError::corruption(format!("block {i}: name is not UTF-8")))?;

        // Canonical form is strictly sorted, which also rules out duplicates.
        if let Some(prev) = &prev_name {
            if *prev >= system_name {
                return Err(SaveError::corruption(format!(
                    "block order violation: '{prev}' before '{system_name}'"
                )));
            }
        }

        let schema_version = cursor.read_u32("schema version")?;
        let payload_len = cursor.read_u64("payload length")? as usize;
        if payload_len > cursor.remaining() {
            return Err(SaveError::corruption(format!(
                "block '{system_name}': payload length {payload_len} exceeds remaining {} bytes",
                cursor.remaining()
            )));
        }
        let payload = cursor.read_bytes(payload_len, "payload")?.to_vec();
        let checksum_bytes = cursor.read_bytes(32, "block checksum")?;
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(checksum_bytes);
        let block_checksum = Digest(checksum);

        if SystemBlock::digest(&system_name, schema_version, &payload) != block_checksum {
            return Err(SaveError::corruption(format!(
                "block '{system_name}': checksum mismatch"
            )));
        }

        prev_name = Some(system_name.clone());
        blocks.push(SystemBlock {
            system_name,
            schema_version,
            payload,
            block_checksum,
        });
    }

    if cursor.remaining() != 0 {
        return Err(SaveError::corruption(format!(
            "{} trailing bytes after last block",
            cursor.remaining()
        )));
    }

    Ok(blocks)
}

/// Walks only the framing lengths of a block section, ignoring checksums.
///
/// True when the section ends before the lengths it declares are satisfied.
/// A section whose framing walks to completion but whose bytes are damaged
/// in place is not truncated; scanning uses this to tell a cut-short file
/// from an in-place corruption. A damaged length field is indistinguishable
/// from a short file and reads as truncation.
pub fn section_is_truncated(bytes: &[u8]) -> bool {
    let mut cursor = Cursor::new(bytes);
    let Ok(count) = cursor.read_u32("block count") else {
        return true;
    };
    if count > MAX_BLOCK_COUNT {
        return false; // implausible count is corruption, not a short file
    }
    for _ in 0..count {
        let Ok(name_len) = cursor.read_u32("block name length") else {
            return true;
        };
        if name_len as usize > MAX_BLOCK_NAME_LEN {
            return false;
        }
        if cursor.read_bytes(name_len as usize, "block name").is_err()
            || cursor.read_bytes(4, "schema version").is_err()
        {
            return true;
        }
        let Ok(payload_len) = cursor.read_u64("payload length") else {
            return true;
        };
        if cursor.read_bytes(payload_len as usize, "payload").is_err()
            || cursor.read_bytes(32, "block checksum").is_err()
        {
            return true;
        }
    }
    false
}

/// Assembles the full on-disk document: length-prefixed bincode header
/// followed by the (possibly compressed) body.
pub fn write_document(header: &DocumentHeader, body: &[u8]) -> Result<Vec<u8>> {
    let header_bytes = bincode::serialize(header)
        .map_err(|e| SaveError::serialization(format!("failed to serialize header: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_LEN_SIZE + header_bytes.len() + body.len());
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(body);
    Ok(out)
}

/// Splits raw document bytes into a validated header and the body slice.
///
/// # Errors
///
/// Returns `SaveError::Corruption` when the prefix is truncated, the header
/// fails to decode, or the magic/version check fails.
pub fn parse_document(bytes: &[u8]) -> Result<(DocumentHeader, &[u8])> {
    if bytes.len() < HEADER_LEN_SIZE {
        return Err(SaveError::corruption("document too small for header prefix"));
    }

    let header_len =
        u32::from_le_bytes(bytes[..HEADER_LEN_SIZE].try_into().expect("4-byte slice")) as usize;
    if header_len > MAX_HEADER_LEN {
        return Err(SaveError::corruption(format!(
            "implausible header length {header_len}"
        )));
    }
    if bytes.len() < HEADER_LEN_SIZE + header_len {
        return Err(SaveError::corruption("document truncated: header incomplete"));
    }

    let header: DocumentHeader =
        bincode::deserialize(&bytes[HEADER_LEN_SIZE..HEADER_LEN_SIZE + header_len])
            .map_err(|e| SaveError::corruption(format!("failed to decode header: {e}")))?;

    if !header.validate_magic() {
        return Err(SaveError::corruption(format!(
            "invalid magic bytes {:?}",
            header.magic
        )));
    }
    if !header.validate_version() {
        return Err(SaveError::corruption(format!(
            "unsupported format version {}",
            header.format_version
        )));
    }

    Ok((header, &bytes[HEADER_LEN_SIZE + header_len..]))
}

/// Decodes only the header from a document prefix.
///
/// Useful for listing and scanning without touching payloads; `bytes` need
/// only contain the length prefix and the header itself.
pub fn peek_header(bytes: &[u8]) -> Result<DocumentHeader> {
    if bytes.len() < HEADER_LEN_SIZE {
        return Err(SaveError::corruption("document too small for header prefix"));
    }
    let header_len =
        u32::from_le_bytes(bytes[..HEADER_LEN_SIZE].try_into().expect("4-byte slice")) as usize;
    if header_len > MAX_HEADER_LEN {
        return Err(SaveError::corruption(format!(
            "implausible header length {header_len}"
        )));
    }
    if bytes.len() < HEADER_LEN_SIZE + header_len {
        return Err(SaveError::corruption("document truncated: header incomplete"));
    }
    let header: DocumentHeader =
        bincode::deserialize(&bytes[HEADER_LEN_SIZE..HEADER_LEN_SIZE + header_len])
            .map_err(|e| SaveError::corruption(format!("failed to decode header: {e}")))?;
    if !header.validate_magic() {
        return Err(SaveError::corruption("invalid magic bytes"));
    }
    Ok(header)
}

/// Minimal bounds-checked reader over a byte slice.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(SaveError::corruption(format!(
                "truncated while reading {what}: need {len} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.read_bytes(4, what)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    fn read_u64(&mut self, what: &str) -> Result<u64> {
        let bytes = self.read_bytes(8, what)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecKind;

    fn sample_blocks() -> Vec<SystemBlock> {
        vec![
            SystemBlock::new("military", 1, b"legion positions".to_vec()),
            SystemBlock::new("economy", 3, b"treasury: 1200".to_vec()),
            SystemBlock::new("provinces", 2, vec![0u8; 64]),
        ]
    }

    #[test]
    fn test_encode_is_sorted_and_deterministic() {
        let blocks = sample_blocks();
        let mut reversed = blocks.clone();
        reversed.reverse();

        let a = encode_blocks(&blocks);
        let b = encode_blocks(&reversed);
        assert_eq!(a, b, "encoding must not depend on input order");

        let decoded = decode_blocks(&a).unwrap();
        assert_eq!(decoded[0].system_name, "economy");
        assert_eq!(decoded[1].system_name, "military");
        assert_eq!(decoded[2].system_name, "provinces");
    }

    #[test]
    fn test_decode_roundtrip() {
        let blocks = sample_blocks();
        let encoded = encode_blocks(&blocks);
        let decoded = decode_blocks(&encoded).unwrap();

        assert_eq!(decoded.len(), 3);
        let military = decoded.iter().find(|b| b.system_name == "military").unwrap();
        assert_eq!(military.payload, b"legion positions");
        assert_eq!(military.schema_version, 1);
        assert!(military.checksum_ok());
    }

    #[test]
    fn test_decode_empty_section() {
        let encoded = encode_blocks(&[]);
        assert_eq!(decode_blocks(&encoded).unwrap().len(), 0);
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let encoded = encode_blocks(&sample_blocks());
        for cut in [1, 5, encoded.len() / 2, encoded.len() - 1] {
            let err = decode_blocks(&encoded[..cut]).unwrap_err();
            assert!(
                matches!(err, SaveError::Corruption { .. }),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_decode_rejects_trailing_garbage() {
        let mut encoded = encode_blocks(&sample_blocks());
        encoded.extend_from_slice(b"junk");
        assert!(matches!(
            decode_blocks(&encoded),
            Err(SaveError::Corruption { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_payload_byte_flip() {
        let encoded = encode_blocks(&sample_blocks());
        // Flip every byte position in turn; each flip must be caught.
        let mut caught = 0;
        for i in 0..encoded.len() {
            let mut tampered = encoded.clone();
            tampered[i] ^= 0xFF;
            if decode_blocks(&tampered).is_err() {
                caught += 1;
            }
        }
        assert_eq!(caught, encoded.len(), "every single-byte flip must fail");
    }

    #[test]
    fn test_truncation_check_ignores_in_place_damage() {
        let encoded = encode_blocks(&sample_blocks());
        assert!(!section_is_truncated(&encoded));
        assert!(section_is_truncated(&encoded[..encoded.len() - 1]));
        assert!(section_is_truncated(&encoded[..3]));

        // In-place damage with intact framing is not truncation.
        let mut tampered = encoded.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert!(!section_is_truncated(&tampered));
    }

    #[test]
    fn test_write_parse_document_roundtrip() {
        let body = encode_blocks(&sample_blocks());
        let header = DocumentHeader::new(Digest::compute(&body), false, CodecKind::None);
        let bytes = write_document(&header, &body).unwrap();

        let (parsed_header, parsed_body) = parse_document(&bytes).unwrap();
        assert_eq!(parsed_header.overall_checksum, header.overall_checksum);
        assert_eq!(parsed_body, &body[..]);
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let body = encode_blocks(&sample_blocks());
        let mut header = DocumentHeader::new(Digest::compute(&body), false, CodecKind::None);
        header.magic = *b"NOPE";
        let bytes = write_document(&header, &body).unwrap();
        assert!(matches!(
            parse_document(&bytes),
            Err(SaveError::Corruption { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let body = encode_blocks(&[]);
        let mut header = DocumentHeader::new(Digest::compute(&body), false, CodecKind::None);
        header.format_version = 999;
        let bytes = write_document(&header, &body).unwrap();
        assert!(parse_document(&bytes).is_err());
    }

    #[test]
    fn test_parse_rejects_tiny_input() {
        assert!(parse_document(b"").is_err());
        assert!(parse_document(b"ab").is_err());
    }

    #[test]
    fn test_peek_header() {
        let body = encode_blocks(&sample_blocks());
        let header = DocumentHeader::new(Digest::compute(&body), true, CodecKind::Lz4);
        let bytes = write_document(&header, &body).unwrap();

        let peeked = peek_header(&bytes).unwrap();
        assert_eq!(peeked.overall_checksum, header.overall_checksum);
        assert!(peeked.compressed);
    }
}
