//! Two-dimensional grid maps and one-dimensional profiles.
//!
//! Map-valued parameters interpolate between a minimum and a maximum map;
//! the blended result is persisted next to the case deck and referenced
//! from the deck by file name.

use super::error::{Error, ErrorKind, Result};
use ndarray::{Array1, Array2};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A rectangular grid of values, the unit of map-valued parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct GridMap {
    values: Array2<f64>,
}

impl GridMap {
    /// Wraps an array of grid values.
    #[must_use]
    pub const fn new(values: Array2<f64>) -> Self {
        Self { values }
    }

    /// Grid dimensions as (rows, columns).
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Read-only access to the grid values.
    #[must_use]
    pub const fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Pointwise linear blend between `self` (at -1) and `other` (at +1).
    ///
    /// `v` must lie in `[-1, 1]`; `v = 0` returns the arithmetic middle of
    /// the two maps.
    pub fn blend(&self, other: &Self, v: f64) -> Result<Self> {
        if !(-1.0..=1.0).contains(&v) {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("map interpolation value {v} outside [-1, 1]"),
            ));
        }
        if self.values.dim() != other.values.dim() {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "min and max maps have different grid dimensions",
            ));
        }

        let alpha = 0.5 * (v + 1.0);
        Ok(Self {
            values: (1.0 - alpha) * &self.values + alpha * &other.values,
        })
    }

    /// Reads a grid map from an `.npy` file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let values = Array2::read_npy(BufReader::new(file)).map_err(|err| {
            Error::new(
                ErrorKind::IoError,
                format!("can not read grid map '{}': {err}", path.display()),
            )
        })?;
        Ok(Self { values })
    }

    /// Writes the grid map to an `.npy` file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        self.values.write_npy(BufWriter::new(file)).map_err(|err| {
            Error::new(
                ErrorKind::IoError,
                format!("can not write grid map '{}': {err}", path.display()),
            )
        })
    }
}

/// A one-dimensional profile, the unit of curve-valued parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    values: Array1<f64>,
}

impl Profile {
    /// Wraps an array of profile values.
    #[must_use]
    pub const fn new(values: Array1<f64>) -> Self {
        Self { values }
    }

    /// Number of samples along the profile.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` for an empty profile.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read-only access to the profile values.
    #[must_use]
    pub const fn values(&self) -> &Array1<f64> {
        &self.values
    }

    /// Pointwise linear blend between `self` (at -1) and `other` (at +1).
    pub fn blend(&self, other: &Self, v: f64) -> Result<Self> {
        if !(-1.0..=1.0).contains(&v) {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("curve interpolation value {v} outside [-1, 1]"),
            ));
        }
        if self.values.len() != other.values.len() {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "min and max profiles have different lengths",
            ));
        }

        let alpha = 0.5 * (v + 1.0);
        Ok(Self {
            values: (1.0 - alpha) * &self.values + alpha * &other.values,
        })
    }
}

/// Deterministic file name for a map generated for one run case.
#[must_use]
pub fn case_map_name(case_id: usize, parameter_name: &str) -> String {
    format!("Case_{case_id}_{parameter_name}.npy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use ndarray::array;

    #[test]
    fn blend_midpoint_and_bounds() {
        let low = GridMap::new(array![[0.0, 2.0], [4.0, 6.0]]);
        let high = GridMap::new(array![[10.0, 12.0], [14.0, 16.0]]);

        let mid = low.blend(&high, 0.0).unwrap();
        assert_approx_eq!(f64, mid.values()[[0, 0]], 5.0, ulps = 2);
        assert_approx_eq!(f64, mid.values()[[1, 1]], 11.0, ulps = 2);

        let at_min = low.blend(&high, -1.0).unwrap();
        assert_eq!(at_min, low);
        let at_max = low.blend(&high, 1.0).unwrap();
        assert_eq!(at_max, high);
    }

    #[test]
    fn blend_rejects_out_of_range() {
        let low = GridMap::new(array![[0.0]]);
        let high = GridMap::new(array![[1.0]]);
        assert!(low.blend(&high, 1.5).is_err());
    }

    #[test]
    fn npy_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(case_map_name(3, "HeatProd"));

        let map = GridMap::new(array![[1.5, 2.5], [3.5, 4.5]]);
        map.save(&path).unwrap();
        assert_eq!(GridMap::load(&path).unwrap(), map);
    }

    #[test]
    fn profile_blend() {
        let low = Profile::new(array![0.0, 1.0]);
        let high = Profile::new(array![2.0, 3.0]);
        let half = low.blend(&high, 0.5).unwrap();
        assert_approx_eq!(f64, half.values()[0], 1.5, ulps = 2);
        assert_approx_eq!(f64, half.values()[1], 2.5, ulps = 2);
    }
}
