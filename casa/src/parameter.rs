//! Variable parameters and their bound per-case values.
//!
//! A [`VarParameter`] is the *definition* of one knob of the simulator: its
//! semantic key into the project deck, its range, its probability shape and
//! its base-case value. A [`Parameter`] is one concrete assignment of that
//! knob for a single run case. Definitions are tagged variants behind one
//! small uniform interface; the flattening into fixed-size double vectors is
//! the index convention shared with the design generator, the response
//! surface and the samplers.

use super::error::{Error, ErrorKind, Result};
use super::gridmap::{case_map_name, GridMap, Profile};
use super::project::{split_key, Project, Value};
use super::serial::{Deserializer, Serializer};
use enum_dispatch::enum_dispatch;
use ndarray::Array1;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Serialization version shared by all parameter variants.
const VAR_PARAMETER_VERSION: u32 = 0;

/// Relative tolerance used when validating values read back from a deck.
pub const VALIDATION_TOLERANCE: f64 = 1e-6;

/// Probability shape of a continuous parameter over its range.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PdfShape {
    /// Uniform over the range.
    Block,
    /// Triangular with the peak at the base value.
    Triangle,
    /// Normal with the mean at the base value.
    Normal,
}

impl PdfShape {
    const fn to_u32(self) -> u32 {
        match self {
            Self::Block => 0,
            Self::Triangle => 1,
            Self::Normal => 2,
        }
    }

    fn from_u32(val: u32) -> Result<Self> {
        match val {
            0 => Ok(Self::Block),
            1 => Ok(Self::Triangle),
            2 => Ok(Self::Normal),
            _ => Err(Error::new(
                ErrorKind::DeserializationError,
                format!("unknown pdf shape id {val}"),
            )),
        }
    }
}

/// Log of the marginal density of `shape` at `u`, both in scaled `[-1, 1]`
/// coordinates, with the distribution peak at `mode`.
///
/// Densities are unnormalized; only ratios enter acceptance decisions.
#[must_use]
pub fn log_marginal_density(shape: PdfShape, u: f64, mode: f64) -> f64 {
    const FLOOR: f64 = 1e-12;
    // sigma chosen so that +-3.2 sigma covers the scaled range
    const NORMAL_SIGMA: f64 = 2.0 / 6.4;

    match shape {
        PdfShape::Block => 0.0,
        PdfShape::Triangle => {
            let density = if u <= mode {
                (u + 1.0) / (mode + 1.0).max(FLOOR)
            } else {
                (1.0 - u) / (1.0 - mode).max(FLOOR)
            };
            density.max(FLOOR).ln()
        }
        PdfShape::Normal => {
            let t = (u - mode) / NORMAL_SIGMA;
            -0.5 * t * t
        }
    }
}

/// Closed interval of admissible values for one scalar component.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimpleRange {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl SimpleRange {
    /// Creates a range, rejecting inverted bounds.
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if min > max {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("inverted range [{min}, {max}]"),
            ));
        }
        Ok(Self { min, max })
    }

    /// Returns `true` if `val` lies inside the range.
    #[must_use]
    pub fn contains(&self, val: f64) -> bool {
        (self.min..=self.max).contains(&val)
    }
}

fn ensure_base_in_range(name: &str, base: f64, range: &SimpleRange) -> Result<()> {
    if range.contains(base) {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::OutOfRangeValue,
            format!(
                "base value {base} of '{name}' outside range [{}, {}]",
                range.min, range.max
            ),
        ))
    }
}

/// Uniform interface over all variable-parameter variants.
#[enum_dispatch]
pub trait VarParameterOps {
    /// User-facing parameter name.
    fn name(&self) -> &str;

    /// Semantic deck key, e.g. `BasementIoTbl:TopCrustHeatProd`.
    fn semantic_key(&self) -> &str;

    /// Number of doubles the parameter occupies in flattened vectors.
    fn dimension(&self) -> usize;

    /// Probability shape over the range.
    fn pdf_shape(&self) -> PdfShape;

    /// Base-case value, flattened.
    fn base_as_doubles(&self) -> Vec<f64>;

    /// Lower bounds, flattened.
    fn min_as_doubles(&self) -> Vec<f64>;

    /// Upper bounds, flattened.
    fn max_as_doubles(&self) -> Vec<f64>;

    /// Binds a concrete [`Parameter`] from flattened values, rejecting
    /// values outside the range.
    fn create_parameter(&self, values: &[f64]) -> Result<Parameter>;

    /// Whether design algorithms treat the parameter as categorical.
    fn is_categorical(&self) -> bool;

    /// Stable type string for the deserialization factory table.
    fn serial_type_name(&self) -> &'static str;
}

/// One real-valued deck cell varied over a [`SimpleRange`].
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarVarParameter {
    name: String,
    key: String,
    row: usize,
    range: SimpleRange,
    base: f64,
    pdf: PdfShape,
}

impl ScalarVarParameter {
    /// Defines a scalar parameter; the base value must lie in the range.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        row: usize,
        range: SimpleRange,
        base: f64,
        pdf: PdfShape,
    ) -> Result<Self> {
        let name = name.into();
        ensure_base_in_range(&name, base, &range)?;
        Ok(Self {
            name,
            key: key.into(),
            row,
            range,
            base,
            pdf,
        })
    }

    /// Deck row the parameter addresses.
    #[must_use]
    pub const fn row(&self) -> usize {
        self.row
    }

    /// Admissible range.
    #[must_use]
    pub const fn range(&self) -> &SimpleRange {
        &self.range
    }
}

impl VarParameterOps for ScalarVarParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantic_key(&self) -> &str {
        &self.key
    }

    fn dimension(&self) -> usize {
        1
    }

    fn pdf_shape(&self) -> PdfShape {
        self.pdf
    }

    fn base_as_doubles(&self) -> Vec<f64> {
        vec![self.base]
    }

    fn min_as_doubles(&self) -> Vec<f64> {
        vec![self.range.min]
    }

    fn max_as_doubles(&self) -> Vec<f64> {
        vec![self.range.max]
    }

    fn create_parameter(&self, values: &[f64]) -> Result<Parameter> {
        let [val] = values else {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("'{}' expects 1 value, got {}", self.name, values.len()),
            ));
        };
        if !self.range.contains(*val) {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!(
                    "value {val} of '{}' outside range [{}, {}]",
                    self.name, self.range.min, self.range.max
                ),
            ));
        }
        Ok(Parameter::Scalar(*val))
    }

    fn is_categorical(&self) -> bool {
        false
    }

    fn serial_type_name(&self) -> &'static str {
        "ScalarVarParameter"
    }
}

/// Several real-valued deck cells varied together, one range each.
///
/// The cells live in consecutive rows of one column, starting at
/// `first_row`.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorVarParameter {
    name: String,
    key: String,
    first_row: usize,
    ranges: Vec<SimpleRange>,
    base: Vec<f64>,
    pdf: PdfShape,
}

impl VectorVarParameter {
    /// Defines a vector parameter; every base component must lie in its
    /// range and the component counts must agree.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        first_row: usize,
        ranges: Vec<SimpleRange>,
        base: Vec<f64>,
        pdf: PdfShape,
    ) -> Result<Self> {
        let name = name.into();
        if ranges.is_empty() || ranges.len() != base.len() {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("'{name}' needs matching, non-empty ranges and base values"),
            ));
        }
        for (range, base) in ranges.iter().zip(&base) {
            ensure_base_in_range(&name, *base, range)?;
        }
        Ok(Self {
            name,
            key: key.into(),
            first_row,
            ranges,
            base,
            pdf,
        })
    }

    /// First deck row the parameter addresses.
    #[must_use]
    pub const fn first_row(&self) -> usize {
        self.first_row
    }
}

impl VarParameterOps for VectorVarParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantic_key(&self) -> &str {
        &self.key
    }

    fn dimension(&self) -> usize {
        self.ranges.len()
    }

    fn pdf_shape(&self) -> PdfShape {
        self.pdf
    }

    fn base_as_doubles(&self) -> Vec<f64> {
        self.base.clone()
    }

    fn min_as_doubles(&self) -> Vec<f64> {
        self.ranges.iter().map(|r| r.min).collect()
    }

    fn max_as_doubles(&self) -> Vec<f64> {
        self.ranges.iter().map(|r| r.max).collect()
    }

    fn create_parameter(&self, values: &[f64]) -> Result<Parameter> {
        if values.len() != self.ranges.len() {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!(
                    "'{}' expects {} values, got {}",
                    self.name,
                    self.ranges.len(),
                    values.len()
                ),
            ));
        }
        for (val, range) in values.iter().zip(&self.ranges) {
            if !range.contains(*val) {
                return Err(Error::new(
                    ErrorKind::OutOfRangeValue,
                    format!(
                        "value {val} of '{}' outside range [{}, {}]",
                        self.name, range.min, range.max
                    ),
                ));
            }
        }
        Ok(Parameter::Vector(values.to_vec()))
    }

    fn is_categorical(&self) -> bool {
        false
    }

    fn serial_type_name(&self) -> &'static str {
        "VectorVarParameter"
    }
}

/// A grid-map-valued deck cell interpolated between two bound maps.
///
/// The flattened value is a single interpolation coordinate in `[-1, 1]`;
/// `0` reproduces the base map. Materializing the blended map on disk is an
/// explicit step of the mutation engine, keyed by the case identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct MapVarParameter {
    name: String,
    key: String,
    row: usize,
    min_map: PathBuf,
    max_map: PathBuf,
    pdf: PdfShape,
}

impl MapVarParameter {
    /// Defines a map parameter from the two bound-map files.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        row: usize,
        min_map: impl Into<PathBuf>,
        max_map: impl Into<PathBuf>,
        pdf: PdfShape,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            row,
            min_map: min_map.into(),
            max_map: max_map.into(),
            pdf,
        }
    }

    /// Blends the bound maps at interpolation coordinate `v`.
    pub fn blend(&self, v: f64) -> Result<GridMap> {
        let low = GridMap::load(&self.min_map)?;
        let high = GridMap::load(&self.max_map)?;
        low.blend(&high, v)
    }
}

impl VarParameterOps for MapVarParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantic_key(&self) -> &str {
        &self.key
    }

    fn dimension(&self) -> usize {
        1
    }

    fn pdf_shape(&self) -> PdfShape {
        self.pdf
    }

    fn base_as_doubles(&self) -> Vec<f64> {
        vec![0.0]
    }

    fn min_as_doubles(&self) -> Vec<f64> {
        vec![-1.0]
    }

    fn max_as_doubles(&self) -> Vec<f64> {
        vec![1.0]
    }

    fn create_parameter(&self, values: &[f64]) -> Result<Parameter> {
        let [val] = values else {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("'{}' expects 1 value, got {}", self.name, values.len()),
            ));
        };
        if !(-1.0..=1.0).contains(val) {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!(
                    "interpolation value {val} of '{}' outside [-1, 1]",
                    self.name
                ),
            ));
        }
        Ok(Parameter::MapInterpolation(*val))
    }

    fn is_categorical(&self) -> bool {
        false
    }

    fn serial_type_name(&self) -> &'static str {
        "MapVarParameter"
    }
}

/// A one-dimensional profile interpolated between two bound profiles.
///
/// Blended profile samples are written into consecutive rows of the deck
/// column named by the semantic key.
#[derive(Clone, Debug, PartialEq)]
pub struct CurveVarParameter {
    name: String,
    key: String,
    min: Profile,
    max: Profile,
    pdf: PdfShape,
}

impl CurveVarParameter {
    /// Defines a curve parameter; the profiles must have equal lengths.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        min: Profile,
        max: Profile,
        pdf: PdfShape,
    ) -> Result<Self> {
        let name = name.into();
        if min.len() != max.len() || min.is_empty() {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("'{name}' needs two non-empty profiles of equal length"),
            ));
        }
        Ok(Self {
            name,
            key: key.into(),
            min,
            max,
            pdf,
        })
    }

    /// Blends the bound profiles at interpolation coordinate `v`.
    pub fn blend(&self, v: f64) -> Result<Profile> {
        self.min.blend(&self.max, v)
    }
}

impl VarParameterOps for CurveVarParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantic_key(&self) -> &str {
        &self.key
    }

    fn dimension(&self) -> usize {
        1
    }

    fn pdf_shape(&self) -> PdfShape {
        self.pdf
    }

    fn base_as_doubles(&self) -> Vec<f64> {
        vec![0.0]
    }

    fn min_as_doubles(&self) -> Vec<f64> {
        vec![-1.0]
    }

    fn max_as_doubles(&self) -> Vec<f64> {
        vec![1.0]
    }

    fn create_parameter(&self, values: &[f64]) -> Result<Parameter> {
        let [val] = values else {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("'{}' expects 1 value, got {}", self.name, values.len()),
            ));
        };
        if !(-1.0..=1.0).contains(val) {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!(
                    "interpolation value {val} of '{}' outside [-1, 1]",
                    self.name
                ),
            ));
        }
        Ok(Parameter::CurveInterpolation(*val))
    }

    fn is_categorical(&self) -> bool {
        false
    }

    fn serial_type_name(&self) -> &'static str {
        "CurveVarParameter"
    }
}

/// One value drawn from an ordered finite set of labels.
///
/// The flattened representation is the label index as a double; values
/// arriving from continuous designs snap to the nearest index.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoricalVarParameter {
    name: String,
    key: String,
    row: usize,
    labels: Vec<String>,
    base_index: usize,
}

impl CategoricalVarParameter {
    /// Defines a categorical parameter; the base index must address a label.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        row: usize,
        labels: Vec<String>,
        base_index: usize,
    ) -> Result<Self> {
        let name = name.into();
        if labels.is_empty() || base_index >= labels.len() {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("'{name}' needs labels and a base index inside the set"),
            ));
        }
        Ok(Self {
            name,
            key: key.into(),
            row,
            labels,
            base_index,
        })
    }

    /// The ordered label set.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl VarParameterOps for CategoricalVarParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn semantic_key(&self) -> &str {
        &self.key
    }

    fn dimension(&self) -> usize {
        1
    }

    fn pdf_shape(&self) -> PdfShape {
        PdfShape::Block
    }

    fn base_as_doubles(&self) -> Vec<f64> {
        vec![self.base_index as f64]
    }

    fn min_as_doubles(&self) -> Vec<f64> {
        vec![0.0]
    }

    fn max_as_doubles(&self) -> Vec<f64> {
        vec![(self.labels.len() - 1) as f64]
    }

    fn create_parameter(&self, values: &[f64]) -> Result<Parameter> {
        let [val] = values else {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("'{}' expects 1 value, got {}", self.name, values.len()),
            ));
        };
        let index = val.round();
        if index < 0.0 || index as usize >= self.labels.len() {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("value {val} of '{}' addresses no label", self.name),
            ));
        }
        Ok(Parameter::Category(index as usize))
    }

    fn is_categorical(&self) -> bool {
        true
    }

    fn serial_type_name(&self) -> &'static str {
        "CategoricalVarParameter"
    }
}

/// Tagged union of all variable-parameter definitions.
#[enum_dispatch(VarParameterOps)]
#[derive(Clone, Debug, PartialEq)]
pub enum VarParameter {
    /// Single real deck cell.
    ContinuousScalar(ScalarVarParameter),
    /// Several real deck cells varied together.
    ContinuousVector(VectorVarParameter),
    /// Grid map interpolated between two bound maps.
    ContinuousMap(MapVarParameter),
    /// Profile interpolated between two bound profiles.
    ContinuousCurve(CurveVarParameter),
    /// One label from an ordered finite set.
    Categorical(CategoricalVarParameter),
}

impl VarParameter {
    /// Binds the base-case value.
    pub fn base_parameter(&self) -> Result<Parameter> {
        self.create_parameter(&self.base_as_doubles())
    }

    /// Writes the definition as one named, versioned object group.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.begin_object(self.serial_type_name(), self.name(), VAR_PARAMETER_VERSION)?;
        match self {
            Self::ContinuousScalar(p) => {
                ser.save_string(&p.name, "Name")?;
                ser.save_string(&p.key, "Key")?;
                ser.save_ullong(p.row as u64, "Row")?;
                ser.save_double(p.range.min, "Min")?;
                ser.save_double(p.range.max, "Max")?;
                ser.save_double(p.base, "Base")?;
                ser.save_uint(p.pdf.to_u32(), "Pdf")
            }
            Self::ContinuousVector(p) => {
                ser.save_string(&p.name, "Name")?;
                ser.save_string(&p.key, "Key")?;
                ser.save_ullong(p.first_row as u64, "FirstRow")?;
                ser.save_double_vec(&p.min_as_doubles(), "Mins")?;
                ser.save_double_vec(&p.max_as_doubles(), "Maxs")?;
                ser.save_double_vec(&p.base, "Base")?;
                ser.save_uint(p.pdf.to_u32(), "Pdf")
            }
            Self::ContinuousMap(p) => {
                ser.save_string(&p.name, "Name")?;
                ser.save_string(&p.key, "Key")?;
                ser.save_ullong(p.row as u64, "Row")?;
                ser.save_string(&p.min_map.to_string_lossy(), "MinMap")?;
                ser.save_string(&p.max_map.to_string_lossy(), "MaxMap")?;
                ser.save_uint(p.pdf.to_u32(), "Pdf")
            }
            Self::ContinuousCurve(p) => {
                ser.save_string(&p.name, "Name")?;
                ser.save_string(&p.key, "Key")?;
                ser.save_double_vec(p.min.values().as_slice().unwrap_or(&[]), "MinProfile")?;
                ser.save_double_vec(p.max.values().as_slice().unwrap_or(&[]), "MaxProfile")?;
                ser.save_uint(p.pdf.to_u32(), "Pdf")
            }
            Self::Categorical(p) => {
                ser.save_string(&p.name, "Name")?;
                ser.save_string(&p.key, "Key")?;
                ser.save_ullong(p.row as u64, "Row")?;
                ser.save_string_vec(&p.labels, "Labels")?;
                ser.save_ullong(p.base_index as u64, "BaseIndex")
            }
        }
    }

    /// Reads one definition, dispatching on the stored type string through
    /// the given factory table.
    pub fn load_from(de: &mut Deserializer, factory: &ParameterFactory) -> Result<Self> {
        let (stored_type, _, version) = de.load_any_object_header()?;
        if version > VAR_PARAMETER_VERSION {
            return Err(Error::new(
                ErrorKind::DeserializationError,
                format!(
                    "parameter version {version} is newer than supported {VAR_PARAMETER_VERSION}"
                ),
            ));
        }
        let make = factory.get(stored_type.as_str()).ok_or_else(|| {
            Error::new(
                ErrorKind::DeserializationError,
                format!("no factory entry for parameter type '{stored_type}'"),
            )
        })?;
        make(de)
    }
}

/// Factory table mapping stored type strings to field readers.
pub type ParameterFactory = FxHashMap<&'static str, fn(&mut Deserializer) -> Result<VarParameter>>;

fn load_scalar(de: &mut Deserializer) -> Result<VarParameter> {
    let name = de.load_string("Name")?;
    let key = de.load_string("Key")?;
    let row = de.load_ullong("Row")? as usize;
    let min = de.load_double("Min")?;
    let max = de.load_double("Max")?;
    let base = de.load_double("Base")?;
    let pdf = PdfShape::from_u32(de.load_uint("Pdf")?)?;
    Ok(ScalarVarParameter::new(name, key, row, SimpleRange::new(min, max)?, base, pdf)?.into())
}

fn load_vector(de: &mut Deserializer) -> Result<VarParameter> {
    let name = de.load_string("Name")?;
    let key = de.load_string("Key")?;
    let first_row = de.load_ullong("FirstRow")? as usize;
    let mins = de.load_double_vec("Mins")?;
    let maxs = de.load_double_vec("Maxs")?;
    let base = de.load_double_vec("Base")?;
    let pdf = PdfShape::from_u32(de.load_uint("Pdf")?)?;
    let ranges = mins
        .into_iter()
        .zip(maxs)
        .map(|(min, max)| SimpleRange::new(min, max))
        .collect::<Result<Vec<_>>>()?;
    Ok(VectorVarParameter::new(name, key, first_row, ranges, base, pdf)?.into())
}

fn load_map(de: &mut Deserializer) -> Result<VarParameter> {
    let name = de.load_string("Name")?;
    let key = de.load_string("Key")?;
    let row = de.load_ullong("Row")? as usize;
    let min_map = de.load_string("MinMap")?;
    let max_map = de.load_string("MaxMap")?;
    let pdf = PdfShape::from_u32(de.load_uint("Pdf")?)?;
    Ok(MapVarParameter::new(name, key, row, min_map, max_map, pdf).into())
}

fn load_curve(de: &mut Deserializer) -> Result<VarParameter> {
    let name = de.load_string("Name")?;
    let key = de.load_string("Key")?;
    let min = Profile::new(Array1::from(de.load_double_vec("MinProfile")?));
    let max = Profile::new(Array1::from(de.load_double_vec("MaxProfile")?));
    let pdf = PdfShape::from_u32(de.load_uint("Pdf")?)?;
    Ok(CurveVarParameter::new(name, key, min, max, pdf)?.into())
}

fn load_categorical(de: &mut Deserializer) -> Result<VarParameter> {
    let name = de.load_string("Name")?;
    let key = de.load_string("Key")?;
    let row = de.load_ullong("Row")? as usize;
    let labels = de.load_string_vec("Labels")?;
    let base_index = de.load_ullong("BaseIndex")? as usize;
    Ok(CategoricalVarParameter::new(name, key, row, labels, base_index)?.into())
}

/// Builds the default factory table covering all built-in variants.
#[must_use]
pub fn default_parameter_factory() -> ParameterFactory {
    let mut table = ParameterFactory::default();
    table.insert("ScalarVarParameter", load_scalar as _);
    table.insert("VectorVarParameter", load_vector as _);
    table.insert("MapVarParameter", load_map as _);
    table.insert("CurveVarParameter", load_curve as _);
    table.insert("CategoricalVarParameter", load_categorical as _);
    table
}

/// One bound assignment of a variable parameter for a single run case.
#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    /// Scalar value.
    Scalar(f64),
    /// Vector value, one entry per component.
    Vector(Vec<f64>),
    /// Map interpolation coordinate in `[-1, 1]`.
    MapInterpolation(f64),
    /// Curve interpolation coordinate in `[-1, 1]`.
    CurveInterpolation(f64),
    /// Index into the categorical label set.
    Category(usize),
}

fn pairing_error(def: &VarParameter) -> Error {
    Error::new(
        ErrorKind::MutationError,
        format!("bound value of '{}' does not match its definition", def.name()),
    )
}

impl Parameter {
    /// Canonical flattening used by design matrices and proxies.
    #[must_use]
    pub fn as_doubles(&self) -> Vec<f64> {
        match self {
            Self::Scalar(v) | Self::MapInterpolation(v) | Self::CurveInterpolation(v) => {
                vec![*v]
            }
            Self::Vector(vals) => vals.clone(),
            Self::Category(index) => vec![*index as f64],
        }
    }

    /// Injects the value into a project deck.
    ///
    /// Map parameters materialize their blended grid next to the deck under
    /// a name derived from the case identifier and reference it from the
    /// deck cell; repeating the call overwrites the same file.
    pub fn set_in_project(
        &self,
        def: &VarParameter,
        project: &mut Project,
        case_id: usize,
        case_dir: &Path,
    ) -> Result<()> {
        let (table, column) = split_key(def.semantic_key())?;
        match (self, def) {
            (Self::Scalar(val), VarParameter::ContinuousScalar(scalar)) => {
                project.set_value(table, scalar.row(), column, Value::Float(*val));
                Ok(())
            }
            (Self::Vector(vals), VarParameter::ContinuousVector(vector)) => {
                for (offset, val) in vals.iter().enumerate() {
                    project.set_value(
                        table,
                        vector.first_row() + offset,
                        column,
                        Value::Float(*val),
                    );
                }
                Ok(())
            }
            (Self::MapInterpolation(v), VarParameter::ContinuousMap(map)) => {
                let blended = map.blend(*v)?;
                let file_name = case_map_name(case_id, def.name());
                blended.save(&case_dir.join(&file_name))?;
                project.set_value(table, map.row, column, Value::Text(file_name));
                Ok(())
            }
            (Self::CurveInterpolation(v), VarParameter::ContinuousCurve(curve)) => {
                let blended = curve.blend(*v)?;
                for (row, val) in blended.values().iter().enumerate() {
                    project.set_value(table, row, column, Value::Float(*val));
                }
                Ok(())
            }
            (Self::Category(index), VarParameter::Categorical(cat)) => {
                let label = cat.labels.get(*index).ok_or_else(|| {
                    Error::new(
                        ErrorKind::OutOfRangeValue,
                        format!("category index {index} of '{}' addresses no label", cat.name),
                    )
                })?;
                project.set_value(table, cat.row, column, Value::Text(label.clone()));
                Ok(())
            }
            _ => Err(pairing_error(def)),
        }
    }

    /// Checks that a just-written deck contains this value, within
    /// [`VALIDATION_TOLERANCE`] for numeric cells.
    pub fn validate(&self, def: &VarParameter, project: &Project) -> Result<()> {
        let (table, column) = split_key(def.semantic_key())?;
        let mismatch = |detail: String| {
            Error::new(
                ErrorKind::ValidationError,
                format!("'{}': {detail}", def.name()),
            )
        };
        let check_float = |expected: f64, found: f64| {
            let scale = expected.abs().max(1.0);
            if (expected - found).abs() <= VALIDATION_TOLERANCE * scale {
                Ok(())
            } else {
                Err(mismatch(format!("deck holds {found}, expected {expected}")))
            }
        };

        match (self, def) {
            (Self::Scalar(val), VarParameter::ContinuousScalar(scalar)) => {
                check_float(*val, project.value(table, scalar.row(), column)?.as_float()?)
            }
            (Self::Vector(vals), VarParameter::ContinuousVector(vector)) => {
                for (offset, val) in vals.iter().enumerate() {
                    check_float(
                        *val,
                        project
                            .value(table, vector.first_row() + offset, column)?
                            .as_float()?,
                    )?;
                }
                Ok(())
            }
            (Self::MapInterpolation(_), VarParameter::ContinuousMap(map)) => {
                let found = project.value(table, map.row, column)?.as_text()?;
                if found.starts_with("Case_") && found.ends_with(".npy") {
                    Ok(())
                } else {
                    Err(mismatch(format!("deck references unexpected map '{found}'")))
                }
            }
            (Self::CurveInterpolation(v), VarParameter::ContinuousCurve(curve)) => {
                let blended = curve.blend(*v)?;
                for (row, val) in blended.values().iter().enumerate() {
                    check_float(*val, project.value(table, row, column)?.as_float()?)?;
                }
                Ok(())
            }
            (Self::Category(index), VarParameter::Categorical(cat)) => {
                let found = project.value(table, cat.row, column)?.as_text()?;
                let expected = &cat.labels[*index];
                if found == expected {
                    Ok(())
                } else {
                    Err(mismatch(format!("deck holds '{found}', expected '{expected}'")))
                }
            }
            _ => Err(pairing_error(def)),
        }
    }

    /// Writes the bound value as one record pair.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        match self {
            Self::Scalar(v) => {
                ser.save_uint(0, "PrmKind")?;
                ser.save_double_vec(&[*v], "PrmVals")
            }
            Self::Vector(vals) => {
                ser.save_uint(1, "PrmKind")?;
                ser.save_double_vec(vals, "PrmVals")
            }
            Self::MapInterpolation(v) => {
                ser.save_uint(2, "PrmKind")?;
                ser.save_double_vec(&[*v], "PrmVals")
            }
            Self::CurveInterpolation(v) => {
                ser.save_uint(3, "PrmKind")?;
                ser.save_double_vec(&[*v], "PrmVals")
            }
            Self::Category(index) => {
                ser.save_uint(4, "PrmKind")?;
                ser.save_double_vec(&[*index as f64], "PrmVals")
            }
        }
    }

    /// Reads a bound value written by [`Self::save_to`].
    pub fn load_from(de: &mut Deserializer) -> Result<Self> {
        let kind = de.load_uint("PrmKind")?;
        let vals = de.load_double_vec("PrmVals")?;
        let single = || {
            vals.first().copied().ok_or_else(|| {
                Error::new(ErrorKind::DeserializationError, "empty parameter value")
            })
        };
        match kind {
            0 => Ok(Self::Scalar(single()?)),
            1 => Ok(Self::Vector(vals)),
            2 => Ok(Self::MapInterpolation(single()?)),
            3 => Ok(Self::CurveInterpolation(single()?)),
            4 => Ok(Self::Category(single()? as usize)),
            _ => Err(Error::new(
                ErrorKind::DeserializationError,
                format!("unknown bound-parameter kind {kind}"),
            )),
        }
    }
}
