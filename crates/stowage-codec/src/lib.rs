//! # stowage-codec
//!
//! Byte transforms applied to stored content and to serialized sidecars.
//!
//! A [`TransformChain`] encodes by running its transforms in order and
//! decodes by running them in reverse, so `decode(encode(x)) == x` holds
//! for any chain whose members round-trip individually. The empty chain is
//! the identity.

mod crypt;
mod gzip;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use crypt::{AesGcmTransform, PASSWORD_ENV};
pub use gzip::GzipTransform;

/// Transform error type.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Compression stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input too short to carry the transform's header.
    #[error("{transform}: input truncated ({len} bytes)")]
    Truncated { transform: &'static str, len: usize },

    /// Encryption failed.
    #[error("{0}: encryption failed")]
    Encrypt(&'static str),

    /// Authentication or decryption failed (wrong password or corrupt data).
    #[error("{0}: decryption failed")]
    Decrypt(&'static str),
}

/// Transform result type.
pub type CodecResult<T> = Result<T, CodecError>;

/// A reversible byte transform.
pub trait Transform: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Encode bytes for storage.
    fn encode(&self, data: &[u8]) -> CodecResult<Vec<u8>>;

    /// Decode bytes read from storage.
    fn decode(&self, data: &[u8]) -> CodecResult<Vec<u8>>;
}

/// Ordered list of transforms.
#[derive(Clone, Default)]
pub struct TransformChain {
    transforms: Vec<Arc<dyn Transform>>,
}

impl fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.transforms.iter().map(|t| t.name()))
            .finish()
    }
}

impl TransformChain {
    /// The identity chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transform; it runs after the existing ones when encoding.
    pub fn with(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Number of transforms.
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Returns true for the identity chain.
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Apply every transform in order.
    pub fn encode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        let mut out = data.to_vec();
        for transform in &self.transforms {
            out = transform.encode(&out)?;
        }
        Ok(out)
    }

    /// Undo [`encode`](Self::encode), applying transforms in reverse.
    pub fn decode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        let mut out = data.to_vec();
        for transform in self.transforms.iter().rev() {
            out = transform.decode(&out).inspect_err(|e| {
                tracing::debug!(transform = transform.name(), error = %e, "decode failed");
            })?;
        }
        Ok(out)
    }
}

impl<T: Transform + 'static> FromIterator<T> for TransformChain {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            transforms: iter
                .into_iter()
                .map(|t| Arc::new(t) as Arc<dyn Transform>)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Vec<u8>> {
        vec![
            Vec::new(),
            b"hello".to_vec(),
            "日本語のテキスト".as_bytes().to_vec(),
            (0..=255u8).collect(),
            vec![0u8; 10_000],
        ]
    }

    fn chains() -> Vec<TransformChain> {
        vec![
            TransformChain::new(),
            TransformChain::new().with(GzipTransform::default()),
            TransformChain::new().with(AesGcmTransform::new("secret")),
            TransformChain::new()
                .with(GzipTransform::default())
                .with(AesGcmTransform::new("secret")),
            TransformChain::new()
                .with(AesGcmTransform::new(""))
                .with(GzipTransform::default()),
        ]
    }

    #[test]
    fn test_every_chain_round_trips() {
        for chain in chains() {
            for sample in samples() {
                let encoded = chain.encode(&sample).unwrap();
                assert_eq!(chain.decode(&encoded).unwrap(), sample, "chain {:?}", chain);
            }
        }
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain = TransformChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.encode(b"abc").unwrap(), b"abc");
    }

    #[test]
    fn test_decode_order_is_reversed() {
        // gzip-then-encrypt output is not gzip data
        let chain = TransformChain::new()
            .with(GzipTransform::default())
            .with(AesGcmTransform::new("k"));
        let encoded = chain.encode(b"payload").unwrap();
        assert!(GzipTransform::default().decode(&encoded).is_err());
        assert_eq!(chain.len(), 2);
    }
}
