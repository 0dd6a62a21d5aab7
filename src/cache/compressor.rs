//! Compression of large cache payloads.
//!
//! Values whose logical size exceeds the configured threshold are stored as
//! zstd frames. Decompression reverses the encoding before the codec
//! decodes the value.

use thiserror::Error;

use crate::config::CompressionConfig;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    ZstdError(#[from] std::io::Error),
}

/// The compression engine.
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Whether a value of `size_bytes` should be stored compressed.
    pub fn should_compress(&self, size_bytes: usize) -> bool {
        self.config.enabled && size_bytes > self.config.threshold_bytes
    }

    pub fn threshold(&self) -> usize {
        self.config.threshold_bytes
    }

    /// Compress data with zstd.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let compressed = zstd::encode_all(data, self.config.zstd_level)?;
        Ok(compressed)
    }

    /// Decompress zstd data.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let decompressed = zstd::decode_all(data)?;
        Ok(decompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_roundtrip() {
        let compressor = Compressor::new(CompressionConfig::default());
        let data = vec![42u8; 4096];

        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len()); // should compress well

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_threshold() {
        let compressor = Compressor::new(CompressionConfig {
            threshold_bytes: 100,
            ..Default::default()
        });
        assert!(!compressor.should_compress(100));
        assert!(compressor.should_compress(101));

        let disabled = Compressor::new(CompressionConfig {
            enabled: false,
            threshold_bytes: 100,
            ..Default::default()
        });
        assert!(!disabled.should_compress(10_000));
    }

    #[test]
    fn test_corrupt_input_is_an_error() {
        let compressor = Compressor::new(CompressionConfig::default());
        assert!(compressor.decompress(b"definitely not zstd").is_err());
    }
}
