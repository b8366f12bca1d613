//! Gzip decompression collaborator.
//!
//! Decoders call [`Inflate::inflate`] whenever magic bytes or a declared
//! encoding say the payload is compressed. The default [`GzipInflater`]
//! streams through `flate2`, accepting multi-member archives.

use crate::error::{Error, Result};
use flate2::bufread::MultiGzDecoder;
use std::io::{BufReader, Read};

/// Gzip magic bytes (RFC 1952).
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const GZIP_BUFFER_SIZE: usize = 256 * 1024;

/// True if `bytes` begins with the gzip magic.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

/// Byte-array-to-byte-array decompression primitive.
pub trait Inflate: Send + Sync {
    /// Decompress a complete compressed payload.
    fn inflate(&self, compressed: &[u8]) -> Result<Vec<u8>>;
}

/// Streaming gzip decoder backed by `flate2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipInflater;

const MAX_INFLATE_RATIO: usize = 16;

fn estimate_gzip_uncompressed_size(compressed: &[u8]) -> usize {
    // ISIZE trailer, modulo 2^32; only a capacity hint.
    let hint = if compressed.len() >= 4 {
        let trailer = &compressed[compressed.len() - 4..];
        u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize
    } else {
        compressed.len() * 4
    };
    hint.min(compressed.len().saturating_mul(MAX_INFLATE_RATIO))
}

impl Inflate for GzipInflater {
    fn inflate(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let cursor = std::io::Cursor::new(compressed);
        let mut decoder = MultiGzDecoder::new(BufReader::with_capacity(GZIP_BUFFER_SIZE, cursor));

        let mut output = Vec::with_capacity(estimate_gzip_uncompressed_size(compressed));
        decoder
            .read_to_end(&mut output)
            .map_err(|e| Error::Decompression(format!("gzip stream decode failed: {e}")))?;
        Ok(output)
    }
}
