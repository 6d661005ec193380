//! Error types for terratiles-codec.

use thiserror::Error;

/// Errors that can occur while serializing or parsing tile images.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The zlib stream could not be written or inflated.
    #[error("zlib stream error: {0}")]
    Zlib(#[from] std::io::Error),

    /// Image dimensions cannot be represented.
    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },

    /// Pixel buffer length does not match the dimensions.
    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    BufferLength {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },

    /// The byte stream does not start with the PNG signature.
    #[error("Missing PNG signature")]
    InvalidSignature,

    /// Malformed chunk structure.
    #[error("Decode error at offset {offset}: {message}")]
    DecodeError {
        /// Byte offset where the error occurred.
        offset: usize,
        /// Description of the error.
        message: String,
    },

    /// A scanline uses a filter type other than 0 (None).
    #[error("Unsupported filter type {filter} on scanline {row}")]
    UnsupportedFilter {
        /// Scanline index, counted from the top.
        row: usize,
        /// Filter type byte found.
        filter: u8,
    },

    /// Chunk CRC does not match its contents.
    #[error("CRC mismatch in {chunk} chunk: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Chunk type.
        chunk: String,
        /// CRC stored in the stream.
        expected: u32,
        /// CRC computed over type and data.
        actual: u32,
    },
}

impl CodecError {
    /// Create a decode error at a specific offset.
    pub fn decode_at(offset: usize, message: impl Into<String>) -> Self {
        CodecError::DecodeError {
            offset,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CodecError::decode_at(33, "truncated chunk");
        assert!(err.to_string().contains("offset 33"));

        let err = CodecError::ChecksumMismatch {
            chunk: "IDAT".to_string(),
            expected: 0xdeadbeef,
            actual: 1,
        };
        assert!(err.to_string().contains("0xdeadbeef"));
        assert!(err.to_string().contains("0x00000001"));
    }
}
