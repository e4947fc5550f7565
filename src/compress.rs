//! Entropy-gated compression for save document bodies.
//!
//! Compression is skipped for tiny payloads, for payloads whose sampled
//! byte-histogram entropy says they won't shrink, and whenever the codec
//! output ends up no smaller than the input. Decompression maps truncated
//! or length-mismatched streams to typed corruption errors.

use crate::config::{CodecKind, CompressionSection};
use crate::error::{Result, SaveError};

/// Compressor configured from [`CompressionSection`].
#[derive(Debug, Clone)]
pub struct Compressor {
    codec: CodecKind,
    level: i32,
    min_size_threshold: usize,
    entropy_threshold_bits: f64,
    entropy_sample_size: usize,
}

impl Compressor {
    pub fn new(config: &CompressionSection) -> Self {
        Self {
            codec: config.codec,
            level: config.level,
            min_size_threshold: config.min_size_threshold,
            entropy_threshold_bits: config.entropy_threshold_bits,
            entropy_sample_size: config.entropy_sample_size,
        }
    }

    /// The configured codec.
    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    /// Compresses `bytes` when it is likely to pay off.
    ///
    /// Returns the (possibly untouched) bytes and whether compression was
    /// applied.
    pub fn maybe_compress(&self, bytes: &[u8]) -> Result<(Vec<u8>, bool)> {
        if self.codec == CodecKind::None || bytes.len() < self.min_size_threshold {
            return Ok((bytes.to_vec(), false));
        }

        let entropy = sample_entropy(bytes, self.entropy_sample_size);
        if entropy > self.entropy_threshold_bits {
            tracing::debug!(
                entropy_bits = entropy,
                len = bytes.len(),
                "skipping compression: data looks incompressible"
            );
            return Ok((bytes.to_vec(), false));
        }

        let compressed = self.compress(bytes)?;
        if compressed.len() >= bytes.len() {
            // The estimate was wrong; store raw rather than grow the file.
            return Ok((bytes.to_vec(), false));
        }
        Ok((compressed, true))
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match self.codec {
            CodecKind::None => Ok(bytes.to_vec()),
            CodecKind::Lz4 => Ok(lz4_flex::compress_prepend_size(bytes)),
            CodecKind::Zstd => zstd::encode_all(bytes, self.level)
                .map_err(|e| SaveError::serialization(format!("zstd compression failed: {e}"))),
        }
    }

    /// Decompresses `bytes` with `codec`, or passes them through when
    /// `compressed` is false.
    ///
    /// # Errors
    ///
    /// Returns `SaveError::Corruption` for truncated or length-mismatched
    /// streams.
    pub fn decompress(bytes: &[u8], compressed: bool, codec: CodecKind) -> Result<Vec<u8>> {
        if !compressed {
            return Ok(bytes.to_vec());
        }
        match codec {
            CodecKind::None => Err(SaveError::corruption(
                "document marked compressed but codec is 'none'",
            )),
            CodecKind::Lz4 => {
                // The prepended size is part of the stream's integrity
                // contract; the decoded length must match it exactly.
                let (declared, stream) = lz4_flex::block::uncompressed_size(bytes)
                    .map_err(|e| SaveError::corruption(format!("lz4 size prefix invalid: {e}")))?;
                let out = lz4_flex::block::decompress(stream, declared)
                    .map_err(|e| SaveError::corruption(format!("lz4 decompression failed: {e}")))?;
                if out.len() != declared {
                    return Err(SaveError::corruption(format!(
                        "lz4 length mismatch: prefix declares {declared} bytes, stream decoded {}",
                        out.len()
                    )));
                }
                Ok(out)
            }
            CodecKind::Zstd => zstd::decode_all(bytes)
                .map_err(|e| SaveError::corruption(format!("zstd decompression failed: {e}"))),
        }
    }
}

/// Shannon entropy (bits per byte) over an evenly-strided sample of `bytes`.
///
/// 8.0 means uniformly random; typical serialized game state sits well
/// below the gate threshold, already-compressed or encrypted data above it.
fn sample_entropy(bytes: &[u8], sample_size: usize) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }

    let stride = (bytes.len() / sample_size.max(1)).max(1);
    let mut histogram = [0u64; 256];
    let mut sampled = 0u64;
    let mut i = 0;
    while i < bytes.len() {
        histogram[bytes[i] as usize] += 1;
        sampled += 1;
        i += stride;
    }

    let total = sampled as f64;
    let mut entropy = 0.0;
    for &count in &histogram {
        if count > 0 {
            let p = count as f64 / total;
            entropy -= p * p.log2();
        }
    }
    entropy
}
