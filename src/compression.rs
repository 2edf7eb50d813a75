//! Payload compression for bundles.
//!
//! Payloads above a configurable threshold are gzip-compressed and
//! flagged in the bundle envelope. Decompression is bounded so a
//! hostile frame cannot expand past the frame-size cap.

use bytes::Bytes;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::{
    fmt,
    io::{Read, Write},
};

/// Errors from payload (de)compression.
#[derive(Debug)]
pub enum CompressionError {
    /// The compressed stream is corrupt.
    Corrupt(String),
    /// The decompressed payload would exceed the frame-size cap.
    TooLarge {
        /// Configured cap in bytes.
        max_size: usize,
    },
}

impl fmt::Display for CompressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionError::Corrupt(msg) => {
                write!(f, "corrupt compressed payload: {}", msg)
            }
            CompressionError::TooLarge { max_size } => {
                write!(f, "decompressed payload exceeds {} bytes", max_size)
            }
        }
    }
}

impl std::error::Error for CompressionError {}

/// Gzip-compress a payload.
pub fn compress(data: &[u8]) -> Bytes {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    // Writing into a Vec cannot fail.
    encoder.write_all(data).expect("write to vec");
    Bytes::from(encoder.finish().expect("finish gzip stream"))
}

/// Decompress a gzip payload, refusing to expand past `max_size`.
pub fn decompress(data: &[u8], max_size: usize) -> Result<Bytes, CompressionError> {
    let mut decoder = GzDecoder::new(data).take(max_size as u64 + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CompressionError::Corrupt(e.to_string()))?;
    if out.len() > max_size {
        return Err(CompressionError::TooLarge { max_size });
    }
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_roundtrip() {
        let data = vec![7u8; 16 * 1024];
        let compressed = compress(&data);
        assert!(compressed.len() < data.len());
        let restored = decompress(&compressed, 64 * 1024).unwrap();
        assert_eq!(restored.as_ref(), data.as_slice());
    }

    #[test]
    fn test_decompress_rejects_expansion_bomb() {
        let data = vec![0u8; 1024 * 1024];
        let compressed = compress(&data);
        let err = decompress(&compressed, 1024).unwrap_err();
        assert!(matches!(err, CompressionError::TooLarge { .. }));
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let err = decompress(b"definitely not gzip", 1024).unwrap_err();
        assert!(matches!(err, CompressionError::Corrupt(_)));
    }
}
