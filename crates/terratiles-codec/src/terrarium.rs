//! Terrarium elevation encoding.
//!
//! A height `h` in metres is stored across three 8-bit channels so that
//!
//! ```text
//! h = R·256 + G + B/256 − 32768
//! ```
//!
//! giving a range of `[-32768, 32767.996]` m at a resolution of 1/256 m.
//! Encoding is total: out-of-range heights clamp and NaN encodes as sea
//! level, the value nodata is normalized to upstream.

use crate::{CodecError, Result};

/// Offset added to a height before it is split into channels.
pub const TERRARIUM_OFFSET: f64 = 32768.0;

/// Largest offset height that still encodes.
pub const MAX_OFFSET_HEIGHT: f64 = 65535.999;

/// Encoding name recorded in pyramid manifests.
pub const ENCODING_NAME: &str = "terrarium";

/// Encode one height into `[R, G, B]`.
pub fn encode(height: f32) -> [u8; 3] {
    let h = if height.is_nan() { 0.0 } else { height as f64 };
    let e = (h + TERRARIUM_OFFSET).clamp(0.0, MAX_OFFSET_HEIGHT);
    let whole = e.floor();

    let r = (whole / 256.0).floor() as u8;
    let g = (whole as u32 % 256) as u8;
    let b = ((e - whole) * 256.0).floor() as u8;
    [r, g, b]
}

/// Decode `[R, G, B]` back to a height in metres.
pub fn decode(rgb: [u8; 3]) -> f64 {
    let [r, g, b] = rgb;
    r as f64 * 256.0 + g as f64 + b as f64 / 256.0 - TERRARIUM_OFFSET
}

/// An RGB raster, 3 bytes per pixel in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelGrid {
    /// Wrap an existing RGB buffer.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CodecError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// One row of `3 · width` bytes.
    pub fn row(&self, row: u32) -> &[u8] {
        let stride = self.width as usize * 3;
        let start = row as usize * stride;
        &self.data[start..start + stride]
    }

    /// The pixel at `(row, col)`.
    pub fn pixel(&self, row: u32, col: u32) -> [u8; 3] {
        let i = (row as usize * self.width as usize + col as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Decoded heights, row-major.
    pub fn heights(&self) -> Vec<f64> {
        self.data
            .chunks_exact(3)
            .map(|px| decode([px[0], px[1], px[2]]))
            .collect()
    }
}

/// Encode a row-major grid of heights.
///
/// # Panics
/// Panics if `samples.len() != width * height`.
pub fn encode_grid(samples: &[f32], width: u32, height: u32) -> PixelGrid {
    assert_eq!(
        samples.len(),
        width as usize * height as usize,
        "sample count must match {}x{}",
        width,
        height
    );

    let mut data = Vec::with_capacity(samples.len() * 3);
    for &h in samples {
        data.extend_from_slice(&encode(h));
    }

    PixelGrid {
        width,
        height,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_reference_values() {
        assert_eq!(encode(-32768.0), [0, 0, 0]);
        assert_eq!(encode(0.0), [128, 0, 0]);
        assert_eq!(encode(10.0), [128, 10, 0]);
        assert_eq!(encode(-1.0), [127, 255, 0]);
        assert_eq!(encode(0.5), [128, 0, 128]);
        assert_eq!(encode(1234.25), [132, 210, 64]);
    }

    #[test]
    fn test_clamping() {
        assert_eq!(encode(-40000.0), [0, 0, 0]);
        assert_eq!(encode(f32::NEG_INFINITY), [0, 0, 0]);
        // 65535.999 splits to 255, 255 and floor(0.999 * 256)
        assert_eq!(encode(40000.0), [255, 255, 255]);
        assert_eq!(encode(f32::INFINITY), [255, 255, 255]);
    }

    #[test]
    fn test_nan_is_sea_level() {
        assert_eq!(encode(f32::NAN), encode(0.0));
    }

    #[test]
    fn test_round_trip_precision() {
        let mut h = -32768.0f32;
        while h < 32767.0 {
            let decoded = decode(encode(h));
            assert!(decoded <= h as f64 + 1e-9, "{} decoded above input", h);
            assert_abs_diff_eq!(decoded, h as f64, epsilon = 1.0 / 256.0);
            h += 97.13;
        }
        for h in [-0.3f32, 0.0, 8848.86, -10994.0, 32767.99] {
            assert_abs_diff_eq!(decode(encode(h)), h as f64, epsilon = 1.0 / 256.0);
        }
    }

    #[test]
    fn test_decode_extremes() {
        assert_eq!(decode([0, 0, 0]), -32768.0);
        assert_eq!(decode([128, 0, 0]), 0.0);
        assert_abs_diff_eq!(decode([255, 255, 255]), 32767.996, epsilon = 1e-3);
    }

    #[test]
    fn test_encode_grid_layout() {
        let grid = encode_grid(&[0.0, 10.0, -1.0, 0.5, 1.0, 2.0], 3, 2);
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert_eq!(grid.as_bytes().len(), 18);
        assert_eq!(grid.pixel(0, 1), [128, 10, 0]);
        assert_eq!(grid.pixel(1, 0), [128, 0, 128]);
        assert_eq!(grid.row(1), &[128, 0, 128, 128, 1, 0, 128, 2, 0]);
        assert_eq!(grid.heights(), vec![0.0, 10.0, -1.0, 0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_from_rgb_length() {
        assert!(PixelGrid::from_rgb(2, 2, vec![0; 12]).is_ok());
        assert!(matches!(
            PixelGrid::from_rgb(2, 2, vec![0; 11]),
            Err(CodecError::BufferLength {
                expected: 12,
                actual: 11
            })
        ));
    }
}
