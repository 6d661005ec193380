//! Spherical Web Mercator (EPSG:3857) forward and inverse transforms.

use std::f64::consts::PI;

/// Sphere radius used by Web Mercator, in meters.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the width of the projected world (π · R), in meters.
pub const WORLD_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// Latitude limit of the square Web Mercator world (arctan(sinh(π))).
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// EPSG code of Web Mercator.
pub const EPSG_WEB_MERCATOR: u32 = 3857;

/// Project a geographic coordinate to Web Mercator meters.
///
/// Latitude is clamped to [`MAX_LATITUDE`] since the projection diverges at
/// the poles.
///
/// Returns `(x, y)`.
pub fn from_geographic(lat: f64, lon: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = lon.to_radians() * EARTH_RADIUS;
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}

/// Unproject Web Mercator meters to a geographic coordinate.
///
/// Returns `(lat, lon)` in degrees.
pub fn to_geographic(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lat, lon)
}
