//! # terratiles-codec
//!
//! Pixel encoding for terrain tiles:
//!
//! - [`terrarium`]: elevation to RGB under the Terrarium scheme
//! - [`png`]: a minimal 8-bit truecolor PNG writer plus a validating chunk
//!   reader
//!
//! The serializer depends only on a zlib compressor (`flate2`) and a
//! CRC-32 implementation (`crc32fast`).
//!
//! ## Example
//!
//! ```
//! use terratiles_codec::{encode_grid, encode_png, read_header};
//!
//! let grid = encode_grid(&[10.0; 4], 2, 2);
//! assert_eq!(grid.pixel(0, 0), [128, 10, 0]);
//!
//! let png = encode_png(&grid)?;
//! assert_eq!(read_header(&png)?.width, 2);
//! # Ok::<(), terratiles_codec::CodecError>(())
//! ```

mod error;
pub mod png;
pub mod terrarium;

pub use error::CodecError;
pub use png::{decode_png, encode_png, read_chunks, read_header, Chunk, ImageHeader, PNG_SIGNATURE};
pub use terrarium::{decode, encode, encode_grid, PixelGrid, ENCODING_NAME};

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
