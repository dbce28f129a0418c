//! Ordered, append-only collections of parameter and observable definitions.
//!
//! The order of members is stable for the lifetime of a scenario and is the
//! index convention used by design matrices, proxy coefficients and
//! serialized run cases.

use super::error::{Error, ErrorKind, Result};
use super::observable::Observable;
use super::parameter::{Parameter, ParameterFactory, VarParameter, VarParameterOps};
use super::serial::{Deserializer, Serializer};

/// The set of variable parameters of one scenario.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSpace {
    parameters: Vec<VarParameter>,
}

impl ParameterSpace {
    /// Creates an empty space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a definition; parameter names must be unique.
    pub fn add(&mut self, parameter: VarParameter) -> Result<()> {
        if self.parameters.iter().any(|p| p.name() == parameter.name()) {
            return Err(Error::new(
                ErrorKind::AlreadyDefined,
                format!("variable parameter '{}' already defined", parameter.name()),
            ));
        }
        self.parameters.push(parameter);
        Ok(())
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Returns `true` when no parameter is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Definition at position `i`.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<&VarParameter> {
        self.parameters.get(i)
    }

    /// Iterator over all definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &VarParameter> {
        self.parameters.iter()
    }

    /// Number of continuous definitions.
    #[must_use]
    pub fn continuous_count(&self) -> usize {
        self.parameters.iter().filter(|p| !p.is_categorical()).count()
    }

    /// Number of categorical definitions.
    #[must_use]
    pub fn categorical_count(&self) -> usize {
        self.parameters.iter().filter(|p| p.is_categorical()).count()
    }

    /// Total number of doubles a flattened parameter vector occupies.
    #[must_use]
    pub fn total_dimension(&self) -> usize {
        self.parameters.iter().map(VarParameterOps::dimension).sum()
    }

    /// Flattened base-case values.
    #[must_use]
    pub fn base_as_doubles(&self) -> Vec<f64> {
        self.parameters
            .iter()
            .flat_map(|p| p.base_as_doubles())
            .collect()
    }

    /// Flattened lower bounds.
    #[must_use]
    pub fn min_as_doubles(&self) -> Vec<f64> {
        self.parameters
            .iter()
            .flat_map(|p| p.min_as_doubles())
            .collect()
    }

    /// Flattened upper bounds.
    #[must_use]
    pub fn max_as_doubles(&self) -> Vec<f64> {
        self.parameters
            .iter()
            .flat_map(|p| p.max_as_doubles())
            .collect()
    }

    /// Scales a flattened vector to `[-1, 1]` per component.
    ///
    /// Components with a degenerate range map to `0`.
    #[must_use]
    pub fn scale(&self, values: &[f64]) -> Vec<f64> {
        let mins = self.min_as_doubles();
        let maxs = self.max_as_doubles();
        values
            .iter()
            .zip(mins.iter().zip(&maxs))
            .map(|(v, (min, max))| {
                if (max - min).abs() > 0.0 {
                    2.0 * (v - min) / (max - min) - 1.0
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Inverse of [`Self::scale`].
    #[must_use]
    pub fn unscale(&self, scaled: &[f64]) -> Vec<f64> {
        let mins = self.min_as_doubles();
        let maxs = self.max_as_doubles();
        scaled
            .iter()
            .zip(mins.iter().zip(&maxs))
            .map(|(u, (min, max))| min + 0.5 * (u + 1.0) * (max - min))
            .collect()
    }

    /// Splits a flattened vector along definition boundaries and binds one
    /// [`Parameter`] per definition.
    pub fn bind_parameters(&self, flat: &[f64]) -> Result<Vec<Parameter>> {
        if flat.len() != self.total_dimension() {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!(
                    "flattened vector has {} doubles, the space needs {}",
                    flat.len(),
                    self.total_dimension()
                ),
            ));
        }
        let mut offset = 0;
        self.parameters
            .iter()
            .map(|definition| {
                let dim = definition.dimension();
                let bound = definition.create_parameter(&flat[offset..offset + dim]);
                offset += dim;
                bound
            })
            .collect()
    }

    /// Writes the space with its members in declaration order.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.begin_object("ParameterSpace", "VarSpace", 0)?;
        ser.save_ullong(self.parameters.len() as u64, "PrmsNum")?;
        for parameter in &self.parameters {
            parameter.save_to(ser)?;
        }
        Ok(())
    }

    /// Reads a space written by [`Self::save_to`].
    pub fn load_from(de: &mut Deserializer, factory: &ParameterFactory) -> Result<Self> {
        de.load_object_header("ParameterSpace", "VarSpace", 0)?;
        let count = de.load_ullong("PrmsNum")?;
        let mut result = Self::new();
        for _ in 0..count {
            result.add(VarParameter::load_from(de, factory)?)?;
        }
        Ok(result)
    }
}

/// The set of observables of one scenario.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservableSpace {
    observables: Vec<Observable>,
}

impl ObservableSpace {
    /// Creates an empty space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a definition; observable names must be unique.
    pub fn add(&mut self, observable: Observable) -> Result<()> {
        if self.observables.iter().any(|o| o.name() == observable.name()) {
            return Err(Error::new(
                ErrorKind::AlreadyDefined,
                format!("observable '{}' already defined", observable.name()),
            ));
        }
        self.observables.push(observable);
        Ok(())
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observables.len()
    }

    /// Returns `true` when no observable is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observables.is_empty()
    }

    /// Definition at position `i`.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<&Observable> {
        self.observables.get(i)
    }

    /// Mutable definition at position `i` (for attaching references and
    /// weights after construction).
    pub fn get_mut(&mut self, i: usize) -> Option<&mut Observable> {
        self.observables.get_mut(i)
    }

    /// Iterator over all definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Observable> {
        self.observables.iter()
    }

    /// Total number of doubles one full realization occupies.
    #[must_use]
    pub fn total_dimension(&self) -> usize {
        self.observables.iter().map(Observable::dimension).sum()
    }

    /// Writes the space with its members in declaration order.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.begin_object("ObservableSpace", "ObsSpace", 0)?;
        ser.save_ullong(self.observables.len() as u64, "ObsNum")?;
        for observable in &self.observables {
            observable.save_to(ser)?;
        }
        Ok(())
    }

    /// Reads a space written by [`Self::save_to`].
    pub fn load_from(de: &mut Deserializer) -> Result<Self> {
        de.load_object_header("ObservableSpace", "ObsSpace", 0)?;
        let count = de.load_ullong("ObsNum")?;
        let mut result = Self::new();
        for _ in 0..count {
            result.add(Observable::load_from(de)?)?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{PdfShape, ScalarVarParameter, SimpleRange};
    use float_cmp::assert_approx_eq;

    fn two_parameter_space() -> ParameterSpace {
        let mut space = ParameterSpace::new();
        space
            .add(
                ScalarVarParameter::new(
                    "A",
                    "TblA:ColA",
                    0,
                    SimpleRange::new(10.0, 40.0).unwrap(),
                    25.0,
                    PdfShape::Block,
                )
                .unwrap()
                .into(),
            )
            .unwrap();
        space
            .add(
                ScalarVarParameter::new(
                    "B",
                    "TblB:ColB",
                    0,
                    SimpleRange::new(0.1, 4.0).unwrap(),
                    2.05,
                    PdfShape::Block,
                )
                .unwrap()
                .into(),
            )
            .unwrap();
        space
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut space = two_parameter_space();
        let dup = ScalarVarParameter::new(
            "A",
            "TblA:ColA",
            0,
            SimpleRange::new(0.0, 1.0).unwrap(),
            0.5,
            PdfShape::Block,
        )
        .unwrap();
        let err = space.add(dup.into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyDefined);
    }

    #[test]
    fn scaling_round_trip() {
        let space = two_parameter_space();
        let scaled = space.scale(&[10.0, 4.0]);
        assert_approx_eq!(f64, scaled[0], -1.0, ulps = 2);
        assert_approx_eq!(f64, scaled[1], 1.0, ulps = 2);

        let back = space.unscale(&scaled);
        assert_approx_eq!(f64, back[0], 10.0, ulps = 4);
        assert_approx_eq!(f64, back[1], 4.0, ulps = 4);
    }

    #[test]
    fn bind_splits_along_definitions() {
        let space = two_parameter_space();
        let bound = space.bind_parameters(&[25.0, 2.05]).unwrap();
        assert_eq!(bound.len(), 2);
        assert!(space.bind_parameters(&[25.0]).is_err());
    }
}
