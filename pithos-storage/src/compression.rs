/// Compression module for blob persistence
///
/// Every table and index blob goes through gzip before it reaches a
/// backend. Compression is lossless and must round-trip byte-exactly;
/// corrupt input to `decompress` raises a decode error rather than
/// returning truncated data.
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pithos_core::{PithosError, PithosResult};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Gzip stream magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Gzip level (0-9, higher = better compression, slower). The default
    /// is a balanced middle level; blobs are rewritten often enough that
    /// maximum compression does not pay for itself.
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { level: 6 }
    }
}

/// A compressed payload together with its size accounting.
#[derive(Debug, Clone)]
pub struct Compressed {
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f64,
}

/// Gzip compressor with a configurable level
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        let level = config.level.min(9);
        Self {
            config: CompressionConfig { level },
        }
    }

    pub fn level(&self) -> u32 {
        self.config.level
    }

    pub fn compress(&self, data: &[u8]) -> PithosResult<Compressed> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(data.len() / 2),
            Compression::new(self.config.level),
        );
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        let original_size = data.len();
        let compressed_size = compressed.len();
        let ratio = if original_size > 0 {
            compressed_size as f64 / original_size as f64
        } else {
            1.0
        };

        Ok(Compressed {
            data: compressed,
            original_size,
            compressed_size,
            ratio,
        })
    }

    pub fn decompress(&self, data: &[u8]) -> PithosResult<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| PithosError::Decode(format!("corrupt gzip stream: {}", e)))?;
        Ok(out)
    }

    /// Check for the gzip magic bytes without decoding.
    pub fn is_gzip(data: &[u8]) -> bool {
        data.len() >= 2 && data[..2] == GZIP_MAGIC
    }
}
