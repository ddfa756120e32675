//! Block codec used to persist chunk fragments.
//!
//! Blocks are self-describing: the decompressed length is stored in a
//! little-endian `u32` header in front of the LZ4 payload, so it can be read
//! back with [`BlockCodec::decompressed_len`] without touching the payload.

use crate::error::{Error, Result};

const LEN_PREFIX: usize = 4;

/// A compress/decompress pair producing self-describing blocks.
pub trait BlockCodec {
    /// Compresses `input` into a block carrying its original length.
    fn compress(&mut self, input: &[u8]) -> Vec<u8>;

    /// Reads the decompressed length from a block header.
    fn decompressed_len(&self, block: &[u8]) -> Result<usize>;

    /// Decompresses a whole block.
    fn decompress(&mut self, block: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block codec with a size-prepended header.
#[derive(Debug, Default, Clone)]
pub struct Lz4Codec;

impl Lz4Codec {
    pub fn new() -> Self {
        Self
    }
}

impl BlockCodec for Lz4Codec {
    fn compress(&mut self, input: &[u8]) -> Vec<u8> {
        lz4_flex::compress_prepend_size(input)
    }

    fn decompressed_len(&self, block: &[u8]) -> Result<usize> {
        let header: [u8; LEN_PREFIX] = block
            .get(..LEN_PREFIX)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                Error::Decompression(format!("block of {} bytes has no header", block.len()))
            })?;
        Ok(u32::from_le_bytes(header) as usize)
    }

    fn decompress(&mut self, block: &[u8]) -> Result<Vec<u8>> {
        let len = self.decompressed_len(block)?;

        let mut out = Vec::new();
        out.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory(len))?;
        out.resize(len, 0);

        let written = lz4_flex::block::decompress_into(&block[LEN_PREFIX..], &mut out)
            .map_err(|e| Error::Decompression(e.to_string()))?;
        if written != len {
            return Err(Error::Decompression(format!(
                "expected {} bytes, got {}",
                len, written
            )));
        }
        Ok(out)
    }
}
