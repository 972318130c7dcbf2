//! Gzip compression.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

use crate::{CodecResult, Transform};

/// Gzip-compresses on encode.
#[derive(Debug, Clone, Copy)]
pub struct GzipTransform {
    level: Compression,
}

impl Default for GzipTransform {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl GzipTransform {
    /// Compress at the given level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Transform for GzipTransform {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn encode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn decode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}
