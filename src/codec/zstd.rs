use std::io;

use log::trace;
use zstd::bulk::Decompressor;

use crate::error::{FormatError, Result};
use crate::pipeline::{RawBlock, Reusable, ResourcePool};

use super::BlockCodec;

/// A reusable decompression context
struct ZstdContext(Decompressor<'static>);
impl Reusable for ZstdContext {
    fn reset(&mut self) {
        // Contexts carry no per-frame state between calls
    }
}

/// Decompresses zstd block payloads
///
/// Decompression contexts are drawn from a small pool. When every context is in
/// use the block is decoded with a one-shot streaming decoder instead of waiting.
/// Uncompressed streams are copied through unchanged.
pub struct ZstdCodec {
    compressed: bool,
    contexts: ResourcePool<ZstdContext>,
}
impl ZstdCodec {
    /// Creates a codec with `num_contexts` pooled decompression contexts
    pub fn new(compressed: bool, num_contexts: usize) -> Result<Self> {
        let num_contexts = if compressed { num_contexts.max(1) } else { 0 };
        let contexts = (0..num_contexts)
            .map(|_| Decompressor::new().map(ZstdContext))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            compressed,
            contexts: ResourcePool::from_items("zstd context", contexts),
        })
    }

    /// A codec for streams whose payloads are stored uncompressed
    pub fn passthrough() -> Self {
        Self {
            compressed: false,
            contexts: ResourcePool::from_items("zstd context", Vec::new()),
        }
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    fn decode(&self, raw: &RawBlock, out: &mut Vec<u8>) -> io::Result<()> {
        if let Some(mut context) = self.contexts.try_acquire() {
            out.reserve(raw.decompressed_len);
            let outcome = context.0.decompress_to_buffer(&raw.payload, out);
            self.contexts
                .release(context)
                .map_err(|e| io::Error::other(e.to_string()))?;
            outcome.map(|_| ())
        } else {
            trace!("No free zstd context for block {}", raw.seq());
            zstd::stream::copy_decode(raw.payload.as_slice(), out)
        }
    }
}
impl BlockCodec for ZstdCodec {
    fn decompress(&self, raw: &RawBlock, out: &mut Vec<u8>) -> Result<()> {
        if !self.compressed {
            out.extend_from_slice(&raw.payload);
            return Ok(());
        }
        if raw.payload.is_empty() && raw.decompressed_len == 0 {
            return Ok(());
        }
        self.decode(raw, out).map_err(|source| {
            FormatError::Decompress {
                seq: raw.seq(),
                source,
            }
            .into()
        })
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    fn raw_block(payload: Vec<u8>, decompressed_len: usize) -> RawBlock {
        RawBlock {
            payload,
            decompressed_len,
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip() -> anyhow::Result<()> {
        let plain: Vec<u8> = (0..4096u32).flat_map(|i| (i % 7).to_le_bytes()).collect();
        let payload = zstd::bulk::compress(&plain, 3)?;
        let codec = ZstdCodec::new(true, 2)?;

        let mut out = Vec::new();
        codec.decompress(&raw_block(payload, plain.len()), &mut out)?;
        assert_eq!(out, plain);
        Ok(())
    }

    #[test]
    fn test_fallback_without_free_context() -> anyhow::Result<()> {
        let plain = vec![42u8; 1000];
        let payload = zstd::bulk::compress(&plain, 1)?;
        let codec = ZstdCodec::new(true, 1)?;
        let held = codec.contexts.try_acquire().unwrap();

        let mut out = Vec::new();
        codec.decompress(&raw_block(payload, plain.len()), &mut out)?;
        assert_eq!(out, plain);
        codec.contexts.release(held)?;
        Ok(())
    }

    #[test]
    fn test_passthrough_copies() -> anyhow::Result<()> {
        let codec = ZstdCodec::passthrough();
        let mut out = Vec::new();
        codec.decompress(&raw_block(vec![1, 2, 3], 3), &mut out)?;
        assert_eq!(out, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_corrupt_payload_is_a_format_error() -> anyhow::Result<()> {
        let codec = ZstdCodec::new(true, 1)?;
        let mut out = Vec::new();
        let err = codec
            .decompress(&raw_block(vec![0xde, 0xad, 0xbe, 0xef], 16), &mut out)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::FormatError(FormatError::Decompress { .. })
        ));
        Ok(())
    }
}
