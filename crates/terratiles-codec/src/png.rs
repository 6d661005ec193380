//! Minimal PNG serialization for RGB tiles.
//!
//! Only what a `raster-dem` client needs is produced: 8-bit truecolor,
//! no interlacing, filter type 0 on every scanline and a single zlib
//! stream at best compression.
//!
//! ## Stream Layout
//!
//! | Part      | Size (bytes)           | Description                                   |
//! |-----------|------------------------|-----------------------------------------------|
//! | signature | 8                      | `89 50 4E 47 0D 0A 1A 0A`                     |
//! | IHDR      | 12 + 13                | width, height, depth 8, colour type 2, 0, 0, 0 |
//! | IDAT      | 12 + compressed length | zlib stream of filtered scanlines             |
//! | IEND      | 12                     | empty                                         |
//!
//! Every chunk is a big-endian length, a 4-byte type, the data and a
//! big-endian CRC-32 computed over type and data.

use crate::terrarium::PixelGrid;
use crate::{CodecError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// The 8-byte PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Largest chunk length and image dimension allowed by PNG.
pub const PNG_MAX_LENGTH: u32 = (1 << 31) - 1;

/// Bit depth per channel.
pub const BIT_DEPTH: u8 = 8;

/// Truecolor (RGB) colour type.
pub const COLOR_TYPE_RGB: u8 = 2;

/// Bytes per RGB pixel.
const BYTES_PER_PIXEL: usize = 3;

/// Size of the chunk length, type and CRC fields together.
const CHUNK_OVERHEAD: usize = 12;

/// Chunk type codes.
pub mod chunk_type {
    /// Image header.
    pub const IHDR: [u8; 4] = *b"IHDR";
    /// Image data.
    pub const IDAT: [u8; 4] = *b"IDAT";
    /// Image trailer.
    pub const IEND: [u8; 4] = *b"IEND";
}

// ============================================================================
// Encoding
// ============================================================================

/// Serialize an RGB grid to PNG bytes.
pub fn encode_png(grid: &PixelGrid) -> Result<Vec<u8>> {
    let (width, height) = (grid.width(), grid.height());
    if width == 0 || height == 0 || width > PNG_MAX_LENGTH || height > PNG_MAX_LENGTH {
        return Err(CodecError::InvalidDimensions { width, height });
    }

    // 1. Filtered scanlines
    let raw = scanlines(grid);

    // 2. zlib stream
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::best());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;
    if compressed.len() > PNG_MAX_LENGTH as usize {
        return Err(CodecError::InvalidDimensions { width, height });
    }

    // 3. Chunks
    let header = ImageHeader::rgb(width, height);
    let mut buf = Vec::with_capacity(PNG_SIGNATURE.len() + 3 * CHUNK_OVERHEAD + 13 + compressed.len());
    buf.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut buf, chunk_type::IHDR, &header.to_bytes());
    write_chunk(&mut buf, chunk_type::IDAT, &compressed);
    write_chunk(&mut buf, chunk_type::IEND, &[]);

    Ok(buf)
}

/// Prefix each row with filter type 0 (None).
///
/// The result is `height · (1 + 3 · width)` bytes.
pub fn scanlines(grid: &PixelGrid) -> Vec<u8> {
    let stride = grid.width() as usize * BYTES_PER_PIXEL;
    let mut raw = Vec::with_capacity(grid.height() as usize * (1 + stride));
    for row in 0..grid.height() {
        raw.push(0);
        raw.extend_from_slice(grid.row(row));
    }
    raw
}

/// Append one chunk: length, type, data, CRC.
fn write_chunk(buf: &mut Vec<u8>, kind: [u8; 4], data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(&kind);
    buf.extend_from_slice(data);
    buf.extend_from_slice(&chunk_crc(&kind, data).to_be_bytes());
}

/// CRC-32 over a chunk's type and data.
pub fn chunk_crc(kind: &[u8; 4], data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    hasher.finalize()
}

// ============================================================================
// Parsing
// ============================================================================

/// A parsed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk type code.
    pub kind: [u8; 4],
    /// Chunk payload.
    pub data: Vec<u8>,
    /// CRC stored in the stream (already verified).
    pub crc: u32,
}

impl Chunk {
    /// Chunk type as text, e.g. `"IHDR"`.
    pub fn kind_str(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }
}

/// Split a PNG stream into chunks, validating the signature, every chunk
/// length and every CRC. The stream must end with `IEND`.
pub fn read_chunks(bytes: &[u8]) -> Result<Vec<Chunk>> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(CodecError::InvalidSignature);
    }

    let mut chunks = Vec::new();
    let mut offset = PNG_SIGNATURE.len();

    loop {
        if bytes.len() - offset < CHUNK_OVERHEAD {
            return Err(CodecError::decode_at(offset, "truncated chunk header"));
        }
        let length = read_u32(bytes, offset);
        if length > PNG_MAX_LENGTH {
            return Err(CodecError::decode_at(
                offset,
                format!("chunk length {} exceeds 2^31-1", length),
            ));
        }
        let length = length as usize;
        if bytes.len() - offset - CHUNK_OVERHEAD < length {
            return Err(CodecError::decode_at(
                offset,
                format!("chunk length {} runs past end of stream", length),
            ));
        }

        let mut kind = [0u8; 4];
        kind.copy_from_slice(&bytes[offset + 4..offset + 8]);
        let data = &bytes[offset + 8..offset + 8 + length];
        let stored = read_u32(bytes, offset + 8 + length);
        let computed = chunk_crc(&kind, data);
        if stored != computed {
            return Err(CodecError::ChecksumMismatch {
                chunk: String::from_utf8_lossy(&kind).into_owned(),
                expected: stored,
                actual: computed,
            });
        }

        offset += CHUNK_OVERHEAD + length;
        chunks.push(Chunk {
            kind,
            data: data.to_vec(),
            crc: stored,
        });

        if kind == chunk_type::IEND {
            break;
        }
    }

    if offset != bytes.len() {
        return Err(CodecError::decode_at(offset, "trailing bytes after IEND"));
    }

    Ok(chunks)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Contents of an `IHDR` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bits per channel.
    pub bit_depth: u8,
    /// Colour type.
    pub color_type: u8,
    /// Compression method.
    pub compression: u8,
    /// Filter method.
    pub filter: u8,
    /// Interlace method.
    pub interlace: u8,
}

impl ImageHeader {
    /// Header for an 8-bit truecolor, non-interlaced image.
    pub fn rgb(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bit_depth: BIT_DEPTH,
            color_type: COLOR_TYPE_RGB,
            compression: 0,
            filter: 0,
            interlace: 0,
        }
    }

    /// The 13 data bytes of the chunk.
    pub fn to_bytes(&self) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0..4].copy_from_slice(&self.width.to_be_bytes());
        out[4..8].copy_from_slice(&self.height.to_be_bytes());
        out[8] = self.bit_depth;
        out[9] = self.color_type;
        out[10] = self.compression;
        out[11] = self.filter;
        out[12] = self.interlace;
        out
    }

    /// Parse an `IHDR` chunk.
    pub fn parse(chunk: &Chunk) -> Result<Self> {
        if chunk.kind != chunk_type::IHDR {
            return Err(CodecError::decode_at(
                PNG_SIGNATURE.len(),
                format!("expected IHDR, found {}", chunk.kind_str()),
            ));
        }
        if chunk.data.len() != 13 {
            return Err(CodecError::decode_at(
                PNG_SIGNATURE.len(),
                format!("IHDR has {} bytes, expected 13", chunk.data.len()),
            ));
        }
        let d = &chunk.data;
        Ok(Self {
            width: read_u32(d, 0),
            height: read_u32(d, 4),
            bit_depth: d[8],
            color_type: d[9],
            compression: d[10],
            filter: d[11],
            interlace: d[12],
        })
    }

    /// Whether this is the only layout this crate writes.
    pub fn is_truecolor8(&self) -> bool {
        *self == Self::rgb(self.width, self.height)
    }
}

/// Parse and validate a PNG stream, returning its header.
pub fn read_header(bytes: &[u8]) -> Result<ImageHeader> {
    let chunks = read_chunks(bytes)?;
    let first = chunks
        .first()
        .ok_or_else(|| CodecError::decode_at(PNG_SIGNATURE.len(), "no chunks"))?;
    ImageHeader::parse(first)
}

/// Decode a PNG written by [`encode_png`] back to pixels.
///
/// Only 8-bit truecolor, non-interlaced images whose scanlines all use
/// filter type 0 are accepted.
pub fn decode_png(bytes: &[u8]) -> Result<PixelGrid> {
    let chunks = read_chunks(bytes)?;
    let first = chunks
        .first()
        .ok_or_else(|| CodecError::decode_at(PNG_SIGNATURE.len(), "no chunks"))?;
    let header = ImageHeader::parse(first)?;
    if !header.is_truecolor8() {
        return Err(CodecError::decode_at(
            PNG_SIGNATURE.len(),
            format!(
                "unsupported layout: depth {}, colour type {}, interlace {}",
                header.bit_depth, header.color_type, header.interlace
            ),
        ));
    }

    let compressed: Vec<u8> = chunks
        .iter()
        .filter(|c| c.kind == chunk_type::IDAT)
        .flat_map(|c| c.data.iter().copied())
        .collect();
    let mut raw = Vec::new();
    ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;

    let stride = header.width as usize * BYTES_PER_PIXEL;
    let expected = header.height as usize * (1 + stride);
    if raw.len() != expected {
        return Err(CodecError::BufferLength {
            expected,
            actual: raw.len(),
        });
    }

    let mut data = Vec::with_capacity(header.height as usize * stride);
    for (row, line) in raw.chunks_exact(1 + stride).enumerate() {
        if line[0] != 0 {
            return Err(CodecError::UnsupportedFilter {
                row,
                filter: line[0],
            });
        }
        data.extend_from_slice(&line[1..]);
    }

    PixelGrid::from_rgb(header.width, header.height, data)
}
