//! Affine pixel-to-projected transforms.

use crate::coord::ProjectedBounds;
use crate::{DemError, Result};

/// Affine mapping from pixel corner coordinates to projected coordinates.
///
/// Coefficients follow the GDAL geotransform order:
///
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// For a north-up raster the rotations are zero and `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// X coordinate of the top-left corner of pixel (0, 0).
    pub origin_x: f64,
    /// X step per column.
    pub pixel_width: f64,
    /// X step per row.
    pub row_rotation: f64,
    /// Y coordinate of the top-left corner of pixel (0, 0).
    pub origin_y: f64,
    /// Y step per column.
    pub col_rotation: f64,
    /// Y step per row (negative for north-up).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Create a north-up transform from an origin and pixel size.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height,
        }
    }

    /// Create from the six GDAL coefficients.
    pub fn from_gdal(c: [f64; 6]) -> Self {
        Self {
            origin_x: c[0],
            pixel_width: c[1],
            row_rotation: c[2],
            origin_y: c[3],
            col_rotation: c[4],
            pixel_height: c[5],
        }
    }

    /// Create the north-up transform that stretches `width × height` pixels
    /// over `bounds`.
    pub fn from_bounds(bounds: &ProjectedBounds, width: u32, height: u32) -> Self {
        Self::north_up(
            bounds.min_x,
            bounds.max_y,
            bounds.width() / width as f64,
            -bounds.height() / height as f64,
        )
    }

    /// Map a (possibly fractional) pixel position to projected coordinates.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.col_rotation + row * self.pixel_height,
        )
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation
    }

    /// Check that the transform is usable: finite, non-zero pixel extents and
    /// invertible.
    pub fn validate(&self) -> Result<()> {
        let coeffs = [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ];
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(DemError::DegenerateTransform(format!(
                "non-finite coefficient in {:?}",
                coeffs
            )));
        }
        if self.pixel_width == 0.0 || self.pixel_height == 0.0 {
            return Err(DemError::DegenerateTransform(format!(
                "zero pixel extent ({} x {})",
                self.pixel_width, self.pixel_height
            )));
        }
        if self.determinant() == 0.0 {
            return Err(DemError::DegenerateTransform(
                "transform is not invertible".to_string(),
            ));
        }
        Ok(())
    }

    /// Compute the inverse mapping (projected to pixel).
    pub fn invert(&self) -> Result<InverseTransform> {
        self.validate()?;
        let inv_det = 1.0 / self.determinant();
        Ok(InverseTransform {
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            a: self.pixel_height * inv_det,
            b: -self.row_rotation * inv_det,
            c: -self.col_rotation * inv_det,
            d: self.pixel_width * inv_det,
        })
    }

    /// Bounds covered by a `width × height` raster under this transform.
    pub fn bounds(&self, width: usize, height: usize) -> ProjectedBounds {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(w, 0.0),
            self.apply(0.0, h),
            self.apply(w, h),
        ];
        let mut bounds = ProjectedBounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        bounds
    }
}

/// Projected-to-pixel mapping produced by [`GeoTransform::invert`].
#[derive(Debug, Clone, Copy)]
pub struct InverseTransform {
    origin_x: f64,
    origin_y: f64,
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

impl InverseTransform {
    /// Map projected coordinates to fractional pixel `(col, row)`.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.origin_x;
        let dy = y - self.origin_y;
        (self.a * dx + self.b * dy, self.c * dx + self.d * dy)
    }
}
