//! The `bounds.json` pyramid manifest read by map clients.

use crate::{PyramidError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use terratiles_codec::ENCODING_NAME;

/// Manifest file name inside the output directory.
pub const MANIFEST_FILE: &str = "bounds.json";

/// Summary of a finished pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PyramidManifest {
    /// `[lon, lat]` initial map centre.
    pub center: [f64; 2],
    /// `[lon_min, lat_min, lon_max, lat_max]`.
    pub bbox: [f64; 4],
    /// Lowest zoom level present.
    pub min_zoom: u8,
    /// Highest zoom level present.
    pub max_zoom: u8,
    /// Number of tiles in the pyramid.
    pub tile_count: u64,
    /// Pixel encoding, always `"terrarium"`.
    pub encoding: String,
}

impl PyramidManifest {
    /// Manifest for a Terrarium pyramid.
    pub fn new(center: [f64; 2], bbox: [f64; 4], min_zoom: u8, max_zoom: u8, tile_count: u64) -> Self {
        Self {
            center,
            bbox,
            min_zoom,
            max_zoom,
            tile_count,
            encoding: ENCODING_NAME.to_string(),
        }
    }

    /// Path of the manifest under `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(MANIFEST_FILE)
    }

    /// Write pretty-printed JSON to `{root}/bounds.json`, replacing any
    /// previous manifest atomically.
    pub fn write(&self, root: &Path) -> Result<PathBuf> {
        let path = Self::path(root);
        let fail = |reason: String| PyramidError::Manifest {
            path: path.clone(),
            reason,
        };

        let mut json = serde_json::to_string_pretty(self).map_err(|e| fail(e.to_string()))?;
        json.push('\n');

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| fail(e.to_string()))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(fail(e.to_string()));
        }
        Ok(path)
    }

    /// Read a manifest back.
    pub fn read(path: &Path) -> Result<Self> {
        let fail = |reason: String| PyramidError::Manifest {
            path: path.to_path_buf(),
            reason,
        };
        let json = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| fail(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keys() {
        let manifest = PyramidManifest::new([15.85, 56.65], [15.76, 56.59, 15.94, 56.71], 10, 15, 1234);
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value["center"], serde_json::json!([15.85, 56.65]));
        assert_eq!(value["bbox"], serde_json::json!([15.76, 56.59, 15.94, 56.71]));
        assert_eq!(value["minZoom"], 10);
        assert_eq!(value["maxZoom"], 15);
        assert_eq!(value["tileCount"], 1234);
        assert_eq!(value["encoding"], "terrarium");
        assert_eq!(value.as_object().unwrap().len(), 6);
    }

    #[test]
    fn test_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = PyramidManifest::new([0.0, 0.0], [-1.0, -1.0, 1.0, 1.0], 0, 2, 5);

        let path = manifest.write(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("bounds.json"));
        assert!(!dir.path().join("bounds.json.tmp").exists());
        assert_eq!(PyramidManifest::read(&path).unwrap(), manifest);
    }

    #[test]
    fn test_write_into_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let manifest = PyramidManifest::new([0.0, 0.0], [-1.0, -1.0, 1.0, 1.0], 0, 2, 5);
        assert!(matches!(
            manifest.write(&missing),
            Err(PyramidError::Manifest { .. })
        ));
    }
}
