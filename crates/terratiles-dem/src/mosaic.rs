//! Single-band elevation mosaic in the Web Mercator plane.

use crate::coord::ProjectedBounds;
use crate::mercator::EPSG_WEB_MERCATOR;
use crate::resample::ElevationSource;
use crate::transform::GeoTransform;
use crate::{DemError, Result};
use std::fmt;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::{debug, warn};

/// ModelPixelScaleTag.
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
/// ModelTiepointTag.
const TAG_MODEL_TIEPOINT: u16 = 33922;
/// ModelTransformationTag.
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
/// GeoKeyDirectoryTag.
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
/// GDAL_NODATA, stored as an ASCII string.
const TAG_GDAL_NODATA: u16 = 42113;

/// GTRasterTypeGeoKey.
const KEY_RASTER_TYPE: u16 = 1025;
/// GeographicTypeGeoKey.
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
/// ProjectedCSTypeGeoKey.
const KEY_PROJECTED_CS_TYPE: u16 = 3072;
/// RasterPixelIsPoint value of GTRasterTypeGeoKey.
const RASTER_PIXEL_IS_POINT: u16 = 2;
/// GeoTIFF "user-defined" code.
const USER_DEFINED: u16 = 32767;

/// EPSG codes that denote spherical Web Mercator.
const WEB_MERCATOR_ALIASES: &[u32] = &[EPSG_WEB_MERCATOR, 3785, 900913, 102100, 102113];

/// Coordinate reference system of a mosaic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Identified by an EPSG code.
    Epsg(u32),
    /// Not declared by the source.
    Unknown,
}

impl Crs {
    /// Web Mercator.
    pub const WEB_MERCATOR: Crs = Crs::Epsg(EPSG_WEB_MERCATOR);

    /// Whether this CRS is (an alias of) Web Mercator.
    pub fn is_web_mercator(&self) -> bool {
        matches!(self, Crs::Epsg(code) if WEB_MERCATOR_ALIASES.contains(code))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Unknown => f.write_str("unknown"),
        }
    }
}

/// An elevation mosaic, already merged and reprojected to Web Mercator by
/// the upstream raster engine.
///
/// Samples equal to the nodata sentinel are replaced by `0.0` when the
/// mosaic is built and remembered in a validity mask, so later stages never
/// see the sentinel magnitude.
#[derive(Debug)]
pub struct ElevationMosaic {
    /// Elevation data in row-major order, nodata normalized to zero.
    data: Vec<f32>,
    /// `true` where the source held a real measurement. `None` when every
    /// sample is valid.
    valid: Option<Vec<bool>>,
    /// Width in pixels.
    width: usize,
    /// Height in pixels.
    height: usize,
    /// Pixel to projected transform.
    transform: GeoTransform,
    /// Declared CRS.
    crs: Crs,
    /// Declared nodata sentinel.
    nodata: Option<f32>,
}

impl ElevationMosaic {
    /// Build a mosaic from raw samples.
    ///
    /// Fails if the dimensions are empty, the buffer length does not match,
    /// the transform is degenerate or the CRS is not Web Mercator.
    pub fn new(
        data: Vec<f32>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: Crs,
        nodata: Option<f32>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(DemError::InvalidMosaic(format!(
                "empty dimensions {}x{}",
                width, height
            )));
        }
        if data.len() != width * height {
            return Err(DemError::InvalidMosaic(format!(
                "expected {} samples for {}x{}, got {}",
                width * height,
                width,
                height,
                data.len()
            )));
        }
        transform.validate()?;
        match crs {
            Crs::Unknown => warn!("Mosaic CRS is not declared, assuming EPSG:3857"),
            crs if !crs.is_web_mercator() => {
                return Err(DemError::UnsupportedCrs(crs.to_string()));
            }
            _ => {}
        }

        let mut data = data;
        let valid = nodata.and_then(|sentinel| normalize_nodata(&mut data, sentinel));

        Ok(Self {
            data,
            valid,
            width,
            height,
            transform,
            crs,
            nodata,
        })
    }

    /// Load a mosaic from a single-band GeoTIFF file.
    pub fn from_geotiff<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mut decoder = Decoder::new(std::io::BufReader::new(file))?;

        // Merged mosaics can be large
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.ifd_value_size = 1024 * 1024 * 1024;
        decoder = decoder.with_limits(limits);

        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => {
                return Err(DemError::UnsupportedDataType(format!(
                    "expected a single-band raster, found {:?}",
                    other
                )))
            }
        }

        let (width, height) = decoder.dimensions()?;
        let geo_keys = decoder
            .get_tag_u16_vec(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))
            .ok();
        let transform = Self::read_geotransform(&mut decoder, geo_keys.as_deref())?;
        let crs = geo_keys.as_deref().map_or(Crs::Unknown, crs_from_geo_keys);
        let nodata = Self::read_nodata_value(&mut decoder);
        let data = Self::decode_elevation_data(&mut decoder)?;

        debug!(
            path = %path.display(),
            width,
            height,
            %crs,
            ?nodata,
            "Loaded GeoTIFF mosaic"
        );

        Self::new(
            data,
            width as usize,
            height as usize,
            transform,
            crs,
            nodata,
        )
    }

    /// Read the affine transform from GeoTIFF tags.
    fn read_geotransform<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
        geo_keys: Option<&[u16]>,
    ) -> Result<GeoTransform> {
        // Pixel-is-point rasters tie the pixel centre, not its corner
        let shift = match geo_keys.and_then(|keys| geo_key_value(keys, KEY_RASTER_TYPE)) {
            Some(RASTER_PIXEL_IS_POINT) => 0.5,
            _ => 0.0,
        };

        if let Ok(m) = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TRANSFORMATION)) {
            if m.len() >= 8 {
                let t = GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]);
                let (origin_x, origin_y) = t.apply(-shift, -shift);
                return Ok(GeoTransform {
                    origin_x,
                    origin_y,
                    ..t
                });
            }
        }

        let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT));
        let pixel_scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE));

        if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
            if tiepoint.len() >= 6 && scale.len() >= 2 {
                // Tiepoint format: [i, j, k, x, y, z] where (i,j) is pixel coords and (x,y) is model coords
                let (i, j) = (tiepoint[0] + shift, tiepoint[1] + shift);
                let (tie_x, tie_y) = (tiepoint[3], tiepoint[4]);
                let (scale_x, scale_y) = (scale[0], scale[1]);

                return Ok(GeoTransform::north_up(
                    tie_x - i * scale_x,
                    tie_y + j * scale_y,
                    scale_x,
                    -scale_y,
                ));
            }
        }

        Err(DemError::InvalidGeoTiff(
            "missing ModelTransformation or ModelTiepoint/ModelPixelScale tags".to_string(),
        ))
    }

    /// Decode elevation data from the TIFF decoder.
    fn decode_elevation_data<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
    ) -> Result<Vec<f32>> {
        let result = decoder.read_image()?;

        match result {
            DecodingResult::F32(data) => Ok(data),
            DecodingResult::F64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        }
    }

    /// Try to read the nodata sentinel from the GDAL_NODATA tag.
    ///
    /// There is no implied default: a mosaic without the tag has no nodata.
    fn read_nodata_value<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
    ) -> Option<f32> {
        let raw = decoder
            .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
            .ok()?;
        let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        match trimmed.to_ascii_lowercase().as_str() {
            "nan" => Some(f32::NAN),
            other => other.parse().ok(),
        }
    }

    /// Dimensions in pixels `(width, height)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Pixel to projected transform.
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Declared CRS.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// Declared nodata sentinel.
    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    /// Footprint of the mosaic in the projected plane.
    pub fn projected_bounds(&self) -> ProjectedBounds {
        self.transform.bounds(self.width, self.height)
    }

    /// Geographic bounds `[lon_min, lat_min, lon_max, lat_max]`.
    pub fn geographic_bounds(&self) -> [f64; 4] {
        self.projected_bounds().to_geographic()
    }

    /// Number of samples that held the nodata sentinel.
    pub fn nodata_count(&self) -> usize {
        self.valid
            .as_ref()
            .map_or(0, |mask| mask.iter().filter(|v| !**v).count())
    }

    /// Normalized elevation at a pixel (nodata reads as `0.0`).
    pub fn value(&self, col: usize, row: usize) -> f32 {
        self.data[row * self.width + col]
    }

    /// Whether the pixel held a real measurement.
    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        self.valid
            .as_ref()
            .map_or(true, |mask| mask[row * self.width + col])
    }
}

impl ElevationSource for ElevationMosaic {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    fn sample(&self, col: usize, row: usize) -> Result<Option<f32>> {
        if col >= self.width || row >= self.height {
            return Err(DemError::SampleRead {
                col,
                row,
                reason: format!("outside {}x{} mosaic", self.width, self.height),
            });
        }
        if self.is_valid(col, row) {
            Ok(Some(self.value(col, row)))
        } else {
            Ok(None)
        }
    }
}

/// Replace every sentinel sample with `0.0`.
///
/// Returns the validity mask, or `None` when the sentinel never occurs.
fn normalize_nodata(data: &mut [f32], sentinel: f32) -> Option<Vec<bool>> {
    let is_nodata = |v: f32| {
        if sentinel.is_nan() {
            v.is_nan()
        } else {
            v == sentinel
        }
    };

    if !data.iter().any(|v| is_nodata(*v)) {
        return None;
    }

    let mask = data
        .iter_mut()
        .map(|v| {
            if is_nodata(*v) {
                *v = 0.0;
                false
            } else {
                true
            }
        })
        .collect();
    Some(mask)
}

/// Look up a directly stored value in a GeoKeyDirectory.
fn geo_key_value(keys: &[u16], key_id: u16) -> Option<u16> {
    // Header: version, revision, minor revision, key count
    let count = *keys.get(3)? as usize;
    keys.get(4..)?
        .chunks_exact(4)
        .take(count)
        .find(|entry| entry[0] == key_id && entry[1] == 0)
        .map(|entry| entry[3])
}

/// Extract the CRS from a GeoKeyDirectory.
fn crs_from_geo_keys(keys: &[u16]) -> Crs {
    let code = geo_key_value(keys, KEY_PROJECTED_CS_TYPE)
        .or_else(|| geo_key_value(keys, KEY_GEOGRAPHIC_TYPE));
    match code {
        Some(USER_DEFINED) | None => Crs::Unknown,
        Some(code) => Crs::Epsg(code as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_transform() -> GeoTransform {
        GeoTransform::north_up(0.0, 0.0, 1.0, -1.0)
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        let err = ElevationMosaic::new(vec![1.0; 3], 2, 2, unit_transform(), Crs::WEB_MERCATOR, None);
        assert!(matches!(err, Err(DemError::InvalidMosaic(_))));
        let err = ElevationMosaic::new(vec![], 0, 2, unit_transform(), Crs::WEB_MERCATOR, None);
        assert!(matches!(err, Err(DemError::InvalidMosaic(_))));
    }

    #[test]
    fn test_rejects_degenerate_transform() {
        let t = GeoTransform::north_up(0.0, 0.0, 0.0, -1.0);
        let err = ElevationMosaic::new(vec![1.0; 4], 2, 2, t, Crs::WEB_MERCATOR, None);
        assert!(matches!(err, Err(DemError::DegenerateTransform(_))));
    }

    #[test]
    fn test_rejects_other_crs() {
        let err = ElevationMosaic::new(vec![1.0; 4], 2, 2, unit_transform(), Crs::Epsg(3006), None);
        assert!(matches!(err, Err(DemError::UnsupportedCrs(_))));
        assert!(ElevationMosaic::new(vec![1.0; 4], 2, 2, unit_transform(), Crs::Epsg(900913), None).is_ok());
    }

    #[test]
    fn test_nodata_is_normalized() {
        let mosaic = ElevationMosaic::new(
            vec![-9999.0, 5.0, 6.0, -9999.0],
            2,
            2,
            unit_transform(),
            Crs::WEB_MERCATOR,
            Some(-9999.0),
        )
        .unwrap();

        assert_eq!(mosaic.value(0, 0), 0.0);
        assert!(!mosaic.is_valid(0, 0));
        assert_eq!(mosaic.sample(1, 0).unwrap(), Some(5.0));
        assert_eq!(mosaic.sample(1, 1).unwrap(), None);
        assert_eq!(mosaic.nodata_count(), 2);
    }

    #[test]
    fn test_declared_sentinel_is_authoritative() {
        // Zero is a real elevation when the sentinel is something else
        let mosaic = ElevationMosaic::new(
            vec![0.0, 1.0, 2.0, 3.0],
            2,
            2,
            unit_transform(),
            Crs::WEB_MERCATOR,
            Some(-32768.0),
        )
        .unwrap();
        assert_eq!(mosaic.sample(0, 0).unwrap(), Some(0.0));
        assert_eq!(mosaic.nodata_count(), 0);
    }

    #[test]
    fn test_nan_sentinel() {
        let mosaic = ElevationMosaic::new(
            vec![f32::NAN, 1.0],
            2,
            1,
            unit_transform(),
            Crs::WEB_MERCATOR,
            Some(f32::NAN),
        )
        .unwrap();
        assert_eq!(mosaic.sample(0, 0).unwrap(), None);
        assert_eq!(mosaic.value(0, 0), 0.0);
    }

    #[test]
    fn test_sample_out_of_range() {
        let mosaic =
            ElevationMosaic::new(vec![1.0; 4], 2, 2, unit_transform(), Crs::WEB_MERCATOR, None).unwrap();
        assert!(matches!(mosaic.sample(2, 0), Err(DemError::SampleRead { .. })));
    }

    #[test]
    fn test_bounds() {
        let mosaic =
            ElevationMosaic::new(vec![1.0; 6], 3, 2, unit_transform(), Crs::WEB_MERCATOR, None).unwrap();
        assert_eq!(mosaic.projected_bounds(), ProjectedBounds::new(0.0, -2.0, 3.0, 0.0));
    }

    #[test]
    fn test_geo_keys() {
        // version 1.1.0, 3 keys: model type, raster type, projected CS
        let keys = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 3857];
        assert_eq!(crs_from_geo_keys(&keys), Crs::WEB_MERCATOR);
        assert_eq!(geo_key_value(&keys, KEY_RASTER_TYPE), Some(1));

        let user_defined = [1, 1, 0, 1, 3072, 0, 1, USER_DEFINED];
        assert_eq!(crs_from_geo_keys(&user_defined), Crs::Unknown);
        assert_eq!(crs_from_geo_keys(&[1, 1, 0]), Crs::Unknown);
    }
}
