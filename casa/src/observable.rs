//! Observable definitions and their realized per-case values.
//!
//! An [`Observable`] names one simulator output to extract: a property at a
//! simulation time and a spatial locator, optionally with a reference
//! measurement. An [`ObsValue`] is the realization for one run case; its
//! position inside the case follows the observable-space index convention.

use super::error::{Error, ErrorKind, Result};
use super::serial::{Deserializer, Serializer};
use serde::{Deserialize, Serialize};

/// Spatial anchor of an observable.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Locator {
    /// A lattice node of the simulation grid.
    GridIjk {
        /// Grid index along the first axis.
        i: u32,
        /// Grid index along the second axis.
        j: u32,
        /// Grid index along the vertical axis.
        k: u32,
    },
    /// A point in model coordinates.
    PointXyz {
        /// Easting.
        x: f64,
        /// Northing.
        y: f64,
        /// Depth.
        z: f64,
    },
    /// A named trap or well, sampled at several depths down its path.
    WellTrap {
        /// Well or trap identifier.
        name: String,
        /// Easting of the crest or well head.
        x: f64,
        /// Northing of the crest or well head.
        y: f64,
        /// Number of depth samples; this is the observable dimension.
        samples: u32,
    },
}

impl Locator {
    fn dimension(&self) -> usize {
        match self {
            Self::GridIjk { .. } | Self::PointXyz { .. } => 1,
            Self::WellTrap { samples, .. } => *samples as usize,
        }
    }
}

/// Reference measurement attached to an observable.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Reference {
    /// Measured value per component.
    pub values: Vec<f64>,
    /// Standard deviation per component.
    pub std_deviations: Vec<f64>,
}

/// Definition of one simulator output to extract.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Observable {
    name: String,
    property: String,
    simulation_time: f64,
    locator: Locator,
    reference: Option<Reference>,
    sa_weight: f64,
    ua_weight: f64,
}

impl Observable {
    /// Defines an observable for `property` at `locator` and
    /// `simulation_time` (in Ma before present).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        property: impl Into<String>,
        simulation_time: f64,
        locator: Locator,
    ) -> Self {
        Self {
            name: name.into(),
            property: property.into(),
            simulation_time,
            locator,
            reference: None,
            sa_weight: 1.0,
            ua_weight: 1.0,
        }
    }

    /// Observable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulator property to extract.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Extraction time in Ma before present.
    #[must_use]
    pub const fn simulation_time(&self) -> f64 {
        self.simulation_time
    }

    /// Spatial anchor.
    #[must_use]
    pub const fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Number of doubles one realization of this observable occupies.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.locator.dimension()
    }

    /// Attaches a reference measurement with per-component deviations.
    pub fn set_reference(&mut self, values: Vec<f64>, std_deviations: Vec<f64>) -> Result<()> {
        if values.len() != self.dimension() || std_deviations.len() != self.dimension() {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!(
                    "reference for '{}' needs {} components",
                    self.name,
                    self.dimension()
                ),
            ));
        }
        self.reference = Some(Reference {
            values,
            std_deviations,
        });
        Ok(())
    }

    /// Returns `true` when a reference measurement is attached.
    #[must_use]
    pub const fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// The attached reference measurement, if any.
    #[must_use]
    pub const fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    /// Weight in sensitivity (Pareto) accumulation.
    #[must_use]
    pub const fn sa_weight(&self) -> f64 {
        self.sa_weight
    }

    /// Weight in uncertainty (RMSE) accumulation.
    #[must_use]
    pub const fn ua_weight(&self) -> f64 {
        self.ua_weight
    }

    /// Sets the sensitivity-analysis weight.
    pub fn set_sa_weight(&mut self, weight: f64) {
        self.sa_weight = weight;
    }

    /// Sets the uncertainty-analysis weight.
    pub fn set_ua_weight(&mut self, weight: f64) {
        self.ua_weight = weight;
    }

    /// Writes the definition as one named, versioned object group.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.begin_object("Observable", &self.name, 0)?;
        ser.save_string(&self.name, "Name")?;
        ser.save_string(&self.property, "Property")?;
        ser.save_double(self.simulation_time, "SimTime")?;
        match &self.locator {
            Locator::GridIjk { i, j, k } => {
                ser.save_uint(0, "LocKind")?;
                ser.save_double_vec(&[f64::from(*i), f64::from(*j), f64::from(*k)], "LocVals")?;
                ser.save_string("", "LocName")?;
            }
            Locator::PointXyz { x, y, z } => {
                ser.save_uint(1, "LocKind")?;
                ser.save_double_vec(&[*x, *y, *z], "LocVals")?;
                ser.save_string("", "LocName")?;
            }
            Locator::WellTrap { name, x, y, samples } => {
                ser.save_uint(2, "LocKind")?;
                ser.save_double_vec(&[*x, *y, f64::from(*samples)], "LocVals")?;
                ser.save_string(name, "LocName")?;
            }
        }
        ser.save_bool(self.reference.is_some(), "HasRef")?;
        if let Some(reference) = &self.reference {
            ser.save_double_vec(&reference.values, "RefVals")?;
            ser.save_double_vec(&reference.std_deviations, "RefStdDevs")?;
        }
        ser.save_double(self.sa_weight, "SaWeight")?;
        ser.save_double(self.ua_weight, "UaWeight")
    }

    /// Reads a definition written by [`Self::save_to`].
    pub fn load_from(de: &mut Deserializer) -> Result<Self> {
        let (stored_type, _, version) = de.load_any_object_header()?;
        if stored_type != "Observable" || version > 0 {
            return Err(Error::new(
                ErrorKind::DeserializationError,
                format!("expected an Observable of version 0, found '{stored_type}' v{version}"),
            ));
        }
        let name = de.load_string("Name")?;
        let property = de.load_string("Property")?;
        let simulation_time = de.load_double("SimTime")?;
        let loc_kind = de.load_uint("LocKind")?;
        let loc_vals = de.load_double_vec("LocVals")?;
        let loc_name = de.load_string("LocName")?;
        if loc_vals.len() != 3 {
            return Err(Error::new(
                ErrorKind::DeserializationError,
                "locator needs exactly three values",
            ));
        }
        let locator = match loc_kind {
            0 => Locator::GridIjk {
                i: loc_vals[0] as u32,
                j: loc_vals[1] as u32,
                k: loc_vals[2] as u32,
            },
            1 => Locator::PointXyz {
                x: loc_vals[0],
                y: loc_vals[1],
                z: loc_vals[2],
            },
            2 => Locator::WellTrap {
                name: loc_name,
                x: loc_vals[0],
                y: loc_vals[1],
                samples: loc_vals[2] as u32,
            },
            _ => {
                return Err(Error::new(
                    ErrorKind::DeserializationError,
                    format!("unknown locator kind {loc_kind}"),
                ));
            }
        };
        let mut result = Self::new(name, property, simulation_time, locator);
        if de.load_bool("HasRef")? {
            let values = de.load_double_vec("RefVals")?;
            let std_deviations = de.load_double_vec("RefStdDevs")?;
            result.set_reference(values, std_deviations)?;
        }
        result.sa_weight = de.load_double("SaWeight")?;
        result.ua_weight = de.load_double("UaWeight")?;
        Ok(result)
    }
}

/// Realized observable for one run case.
///
/// Undefined components are NaN; they are skipped by RMSE accumulation.
#[derive(Clone, Debug, PartialEq)]
pub struct ObsValue {
    values: Vec<f64>,
}

impl ObsValue {
    /// Wraps realized component values.
    #[must_use]
    pub const fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// An all-undefined value of the given dimension.
    #[must_use]
    pub fn undefined(dimension: usize) -> Self {
        Self {
            values: vec![f64::NAN; dimension],
        }
    }

    /// Component values; NaN marks an undefined component.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of components.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when every component is defined.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Writes the realized value.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.save_double_vec(&self.values, "ObsVals")
    }

    /// Reads a realized value written by [`Self::save_to`].
    pub fn load_from(de: &mut Deserializer) -> Result<Self> {
        Ok(Self {
            values: de.load_double_vec("ObsVals")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_follows_locator() {
        let point = Observable::new(
            "Temp@2000m",
            "Temperature",
            0.0,
            Locator::PointXyz {
                x: 1000.0,
                y: 2000.0,
                z: 2000.0,
            },
        );
        assert_eq!(point.dimension(), 1);

        let well = Observable::new(
            "VRe@Well-1",
            "Vr",
            0.0,
            Locator::WellTrap {
                name: "Well-1".to_owned(),
                x: 500.0,
                y: 500.0,
                samples: 4,
            },
        );
        assert_eq!(well.dimension(), 4);
    }

    #[test]
    fn reference_length_must_match_dimension() {
        let mut obs = Observable::new(
            "Temp@2000m",
            "Temperature",
            0.0,
            Locator::PointXyz {
                x: 0.0,
                y: 0.0,
                z: 2000.0,
            },
        );
        assert!(obs.set_reference(vec![80.0, 90.0], vec![5.0, 5.0]).is_err());
        obs.set_reference(vec![80.0], vec![5.0]).unwrap();
        assert!(obs.has_reference());
    }

    #[test]
    fn undefined_components_are_detected() {
        let defined = ObsValue::new(vec![1.0, 2.0]);
        assert!(defined.is_defined());
        let partial = ObsValue::new(vec![1.0, f64::NAN]);
        assert!(!partial.is_defined());
        assert_eq!(ObsValue::undefined(3).dimension(), 3);
    }
}
