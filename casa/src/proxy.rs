//! Response-surface proxies: polynomial regression plus kriging.
//!
//! A proxy approximates every observable component as `P(x) + K(x)` over
//! the parameter vector scaled to `[-1, 1]`: a multivariate polynomial of
//! order 0 to 3 (or an automatically searched term set) fitted by a
//! Householder least-squares decomposition, plus an optional kriging
//! correction interpolating the regression residuals at the training
//! points. Global kriging reproduces the training observables exactly.

use super::case::RunCase;
use super::convert::f64_from_usize;
use super::error::{Error, ErrorKind, Result};
use super::observable::ObsValue;
use super::parameter::VarParameterOps;
use super::serial::{Deserializer, Serializer};
use super::space::ParameterSpace;
use ndarray::{Array1, Array2};
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// Fixed seed of the 75/25 split stream used by the automatic term search.
const AUTO_SEARCH_SEED: u64 = 0x0b5e55ed;

/// Number of random training/blind splits averaged per candidate model.
const AUTO_SEARCH_SPLITS: usize = 10;

/// Kriging interpolation modes of a proxy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KrigingKind {
    /// Polynomial only.
    None,
    /// Correction truncated to the nearest training points.
    Local,
    /// Full kernel over all training points.
    Global,
}

impl KrigingKind {
    const fn to_u32(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Local => 1,
            Self::Global => 2,
        }
    }

    fn from_u32(val: u32) -> Result<Self> {
        match val {
            0 => Ok(Self::None),
            1 => Ok(Self::Local),
            2 => Ok(Self::Global),
            _ => Err(Error::new(
                ErrorKind::DeserializationError,
                format!("unknown kriging kind id {val}"),
            )),
        }
    }
}

// dense Householder least squares, also used for the kriging systems
mod lsq {
    use super::{Array1, Array2, Error, ErrorKind, Result};

    const PIVOT_TOLERANCE: f64 = 1e-10;

    /// Solves `min ||a x - b||` for a full-column-rank `a` with rows >= cols.
    pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
        let (rows, cols) = a.dim();
        if rows < cols {
            return Err(Error::new(
                ErrorKind::NumericsError,
                format!("underdetermined system: {rows} equations for {cols} unknowns"),
            ));
        }

        let mut r = a.clone();
        let mut rhs = b.clone();
        let scale = r.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));

        for k in 0..cols {
            let norm: f64 = (k..rows).map(|i| r[[i, k]] * r[[i, k]]).sum::<f64>().sqrt();
            if norm < PIVOT_TOLERANCE * scale {
                return Err(Error::new(
                    ErrorKind::NumericsError,
                    "singular design matrix in least-squares solve",
                ));
            }
            let alpha = if r[[k, k]] >= 0.0 { -norm } else { norm };
            let mut v = vec![0.0; rows];
            v[k] = r[[k, k]] - alpha;
            for i in k + 1..rows {
                v[i] = r[[i, k]];
            }
            let vtv: f64 = v[k..].iter().map(|x| x * x).sum();
            if vtv <= f64::MIN_POSITIVE {
                continue;
            }
            for j in k..cols {
                let dot: f64 = (k..rows).map(|i| v[i] * r[[i, j]]).sum();
                let factor = 2.0 * dot / vtv;
                for i in k..rows {
                    r[[i, j]] -= factor * v[i];
                }
            }
            let dot: f64 = (k..rows).map(|i| v[i] * rhs[i]).sum();
            let factor = 2.0 * dot / vtv;
            for i in k..rows {
                rhs[i] -= factor * v[i];
            }
        }

        let mut x = Array1::zeros(cols);
        for k in (0..cols).rev() {
            let mut sum = rhs[k];
            for j in k + 1..cols {
                sum -= r[[k, j]] * x[j];
            }
            if r[[k, k]].abs() < PIVOT_TOLERANCE * scale {
                return Err(Error::new(
                    ErrorKind::NumericsError,
                    "singular design matrix in back substitution",
                ));
            }
            x[k] = sum / r[[k, k]];
        }
        Ok(x)
    }
}

/// All monomial exponent tuples over `dims` variables with total degree at
/// most `order`, sorted by degree then lexicographically.
fn monomials(dims: usize, order: usize) -> Vec<Vec<u8>> {
    fn compositions(dims: usize, degree: usize, prefix: &mut Vec<u8>, out: &mut Vec<Vec<u8>>) {
        if dims == 1 {
            prefix.push(degree as u8);
            out.push(prefix.clone());
            prefix.pop();
            return;
        }
        for head in (0..=degree).rev() {
            prefix.push(head as u8);
            compositions(dims - 1, degree - head, prefix, out);
            prefix.pop();
        }
    }

    let mut result = Vec::new();
    for degree in 0..=order {
        compositions(dims, degree, &mut Vec::new(), &mut result);
    }
    result
}

fn eval_term(exponents: &[u8], point: &[f64]) -> f64 {
    exponents
        .iter()
        .zip(point)
        .map(|(&e, &x)| x.powi(i32::from(e)))
        .product()
}

fn design_matrix(terms: &[Vec<u8>], points: &Array2<f64>) -> Array2<f64> {
    let rows = points.nrows();
    let mut a = Array2::zeros((rows, terms.len()));
    for r in 0..rows {
        let point: Vec<f64> = points.row(r).to_vec();
        for (c, term) in terms.iter().enumerate() {
            a[[r, c]] = eval_term(term, &point);
        }
    }
    a
}

/// A named polynomial+kriging response surface.
#[derive(Clone, Debug, PartialEq)]
pub struct RsProxy {
    name: String,
    requested_order: i32,
    kriging: KrigingKind,
    target_r2: f64,
    // fitted state, empty until `calculate`
    terms: Vec<Vec<u8>>,
    coefficients: Array2<f64>,
    training_scaled: Array2<f64>,
    kriging_weights: Array2<f64>,
    kriging_theta: f64,
    kernel_dims: Vec<bool>,
    target_layout: Vec<usize>,
}

impl RsProxy {
    /// Creates an unfitted proxy.
    ///
    /// `order` is the polynomial order 0 to 3, or `-1` for the automatic
    /// term search clipped at `target_r2` adjusted R².
    pub fn new(name: impl Into<String>, order: i32, kriging: KrigingKind, target_r2: f64) -> Result<Self> {
        if !(-1..=3).contains(&order) {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("polynomial order {order} outside -1..=3"),
            ));
        }
        Ok(Self {
            name: name.into(),
            requested_order: order,
            kriging,
            target_r2,
            terms: Vec::new(),
            coefficients: Array2::zeros((0, 0)),
            training_scaled: Array2::zeros((0, 0)),
            kriging_weights: Array2::zeros((0, 0)),
            kriging_theta: 1.0,
            kernel_dims: Vec::new(),
            target_layout: Vec::new(),
        })
    }

    /// Proxy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kriging mode.
    #[must_use]
    pub const fn kriging(&self) -> KrigingKind {
        self.kriging
    }

    /// Requested polynomial order (`-1` means automatic).
    #[must_use]
    pub const fn polynomial_order(&self) -> i32 {
        self.requested_order
    }

    /// Number of fitted polynomial coefficients per observable component.
    #[must_use]
    pub fn coefficient_count(&self) -> usize {
        self.terms.len()
    }

    /// Returns `true` once [`Self::calculate`] succeeded.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        !self.terms.is_empty()
    }

    fn kernel_distance(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .zip(&self.kernel_dims)
            .filter(|&(_, &in_kernel)| in_kernel)
            .map(|((x, y), _)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }

    fn kernel(&self, distance: f64) -> f64 {
        let t = distance / self.kriging_theta;
        (-t * t).exp()
    }

    /// Fits the proxy over the completed training cases.
    ///
    /// Failure leaves any previously fitted state untouched.
    pub fn calculate(&mut self, cases: &[&RunCase], space: &ParameterSpace) -> Result<()> {
        if cases.is_empty() {
            return Err(Error::new(
                ErrorKind::RsProxyError,
                "no completed cases to fit the response surface on",
            ));
        }
        let dims = space.total_dimension();
        let target_layout: Vec<usize> = cases[0]
            .observables()
            .iter()
            .map(ObsValue::dimension)
            .collect();
        let targets: usize = target_layout.iter().sum();
        if targets == 0 {
            return Err(Error::new(
                ErrorKind::RsProxyError,
                "training cases carry no observable values",
            ));
        }
        for case in cases {
            let layout: Vec<usize> = case.observables().iter().map(ObsValue::dimension).collect();
            if layout != target_layout {
                return Err(Error::new(
                    ErrorKind::RsProxyError,
                    format!("case {} has a different observable layout", case.id()),
                ));
            }
        }

        let mut x = Array2::zeros((cases.len(), dims));
        let mut y = Array2::zeros((cases.len(), targets));
        for (r, case) in cases.iter().enumerate() {
            let scaled = space.scale(&case.flattened_parameters());
            for (c, val) in scaled.iter().enumerate() {
                x[[r, c]] = *val;
            }
            for (c, val) in case
                .observables()
                .iter()
                .flat_map(|obs| obs.values().iter().copied())
                .enumerate()
            {
                y[[r, c]] = val;
            }
        }

        let terms = if self.requested_order < 0 {
            auto_search_terms(&x, &y, self.target_r2)?
        } else {
            monomials(dims, self.requested_order as usize)
        };
        if terms.len() > cases.len() {
            return Err(Error::new(
                ErrorKind::RsProxyError,
                format!(
                    "{} polynomial terms need more than the {} training cases",
                    terms.len(),
                    cases.len()
                ),
            ));
        }

        // per-target masked fit so undefined components only drop their own rows
        let a_full = design_matrix(&terms, &x);
        let mut coefficients = Array2::zeros((terms.len(), targets));
        let mut residuals = Array2::zeros((cases.len(), targets));
        for t in 0..targets {
            let defined: Vec<usize> = (0..cases.len()).filter(|&r| y[[r, t]].is_finite()).collect();
            if defined.len() < terms.len() {
                return Err(Error::new(
                    ErrorKind::RsProxyError,
                    format!("observable component {t} is defined on too few cases"),
                ));
            }
            let mut a = Array2::zeros((defined.len(), terms.len()));
            let mut b = Array1::zeros(defined.len());
            for (i, &r) in defined.iter().enumerate() {
                for c in 0..terms.len() {
                    a[[i, c]] = a_full[[r, c]];
                }
                b[i] = y[[r, t]];
            }
            let coeff = lsq::solve(&a, &b)
                .map_err(|err| Error::new(ErrorKind::RsProxyError, err.to_string()))?;
            for (c, val) in coeff.iter().enumerate() {
                coefficients[[c, t]] = *val;
            }
            for r in 0..cases.len() {
                if y[[r, t]].is_finite() {
                    let prediction: f64 =
                        (0..terms.len()).map(|c| a_full[[r, c]] * coefficients[[c, t]]).sum();
                    residuals[[r, t]] = y[[r, t]] - prediction;
                }
            }
        }

        // categorical dimensions stay out of the kriging kernel
        let mut kernel_dims = Vec::with_capacity(dims);
        for parameter in space.iter() {
            let in_kernel = !parameter.is_categorical();
            if !in_kernel {
                log::debug!(
                    "parameter '{}' is categorical and excluded from the kriging kernel",
                    parameter.name()
                );
            }
            kernel_dims.extend(std::iter::repeat(in_kernel).take(parameter.dimension()));
        }

        let mut fitted = Self {
            name: self.name.clone(),
            requested_order: self.requested_order,
            kriging: self.kriging,
            target_r2: self.target_r2,
            terms,
            coefficients,
            training_scaled: x,
            kriging_weights: Array2::zeros((cases.len(), targets)),
            kriging_theta: 1.0,
            kernel_dims,
            target_layout,
        };

        if fitted.kriging != KrigingKind::None {
            fitted.kriging_theta = mean_pairwise_distance(&fitted);
            let n = fitted.training_scaled.nrows();
            let mut phi = Array2::zeros((n, n));
            for a in 0..n {
                for b in 0..n {
                    let distance = fitted.kernel_distance(
                        &fitted.training_scaled.row(a).to_vec(),
                        &fitted.training_scaled.row(b).to_vec(),
                    );
                    phi[[a, b]] = fitted.kernel(distance);
                }
            }
            for t in 0..targets {
                let rhs = residuals.column(t).to_owned();
                let weights = lsq::solve(&phi, &rhs)
                    .map_err(|err| Error::new(ErrorKind::RsProxyError, err.to_string()))?;
                for (r, w) in weights.iter().enumerate() {
                    fitted.kriging_weights[[r, t]] = *w;
                }
            }
        }

        *self = fitted;
        Ok(())
    }

    fn predict_scaled(&self, scaled: &[f64], with_kriging: bool) -> Vec<f64> {
        let targets = self.coefficients.ncols();
        let mut result = vec![0.0; targets];
        for (c, term) in self.terms.iter().enumerate() {
            let basis = eval_term(term, scaled);
            for (t, out) in result.iter_mut().enumerate() {
                *out += basis * self.coefficients[[c, t]];
            }
        }

        if with_kriging && self.kriging != KrigingKind::None {
            let n = self.training_scaled.nrows();
            let mut contributions: Vec<(f64, usize)> = (0..n)
                .map(|r| {
                    let distance =
                        self.kernel_distance(scaled, &self.training_scaled.row(r).to_vec());
                    (distance, r)
                })
                .collect();
            if self.kriging == KrigingKind::Local {
                // truncate the correction to the nearest training points
                let keep = (2 * self.kernel_dims.len() + 1).min(n);
                contributions
                    .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
                contributions.truncate(keep);
            }
            for (distance, r) in contributions {
                let basis = self.kernel(distance);
                for (t, out) in result.iter_mut().enumerate() {
                    *out += basis * self.kriging_weights[[r, t]];
                }
            }
        }
        result
    }

    /// Evaluates the proxy at a flattened parameter vector, optionally
    /// without the kriging correction (the sampler's weaker-setting path).
    pub fn evaluate_vector(
        &self,
        flat_parameters: &[f64],
        space: &ParameterSpace,
        with_kriging: bool,
    ) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(Error::new(
                ErrorKind::RsProxyError,
                format!("proxy '{}' was not calculated yet", self.name),
            ));
        }
        let scaled = space.scale(flat_parameters);
        Ok(self.predict_scaled(&scaled, with_kriging))
    }

    /// Observable component counts the proxy was trained on.
    #[must_use]
    pub fn target_layout(&self) -> &[usize] {
        &self.target_layout
    }

    /// Evaluates the proxy at the case's parameter vector and writes the
    /// observable values into the case. Deterministic and side-effect-free
    /// apart from the written values.
    pub fn evaluate(&self, case: &mut RunCase, space: &ParameterSpace) -> Result<()> {
        if !self.is_fitted() {
            return Err(Error::new(
                ErrorKind::RsProxyError,
                format!("proxy '{}' was not calculated yet", self.name),
            ));
        }
        let scaled = space.scale(&case.flattened_parameters());
        let flat = self.predict_scaled(&scaled, true);

        let mut values = Vec::with_capacity(self.target_layout.len());
        let mut offset = 0;
        for &dim in &self.target_layout {
            values.push(ObsValue::new(flat[offset..offset + dim].to_vec()));
            offset += dim;
        }
        case.set_observables(values);
        Ok(())
    }

    /// Writes the proxy as one named, versioned object group.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.begin_object("RsProxy", &self.name, 0)?;
        ser.save_string(&self.name, "Name")?;
        ser.save_int(self.requested_order, "Order")?;
        ser.save_uint(self.kriging.to_u32(), "Kriging")?;
        ser.save_double(self.target_r2, "TargetR2")?;

        ser.save_ullong(self.terms.len() as u64, "TermsNum")?;
        let dims = self.terms.first().map_or(0, Vec::len);
        ser.save_ullong(dims as u64, "TermDims")?;
        let flat_terms: Vec<u64> = self
            .terms
            .iter()
            .flat_map(|term| term.iter().map(|&e| u64::from(e)))
            .collect();
        ser.save_ullong_vec(&flat_terms, "Terms")?;

        save_matrix(ser, &self.coefficients, "Coefficients")?;
        save_matrix(ser, &self.training_scaled, "Training")?;
        save_matrix(ser, &self.kriging_weights, "KrigingWeights")?;
        ser.save_double(self.kriging_theta, "KrigingTheta")?;
        let kernel: Vec<u64> = self.kernel_dims.iter().map(|&b| u64::from(b)).collect();
        ser.save_ullong_vec(&kernel, "KernelDims")?;
        let layout: Vec<u64> = self.target_layout.iter().map(|&d| d as u64).collect();
        ser.save_ullong_vec(&layout, "TargetLayout")
    }

    /// Reads a proxy written by [`Self::save_to`].
    pub fn load_from(de: &mut Deserializer) -> Result<Self> {
        let (stored_type, _, version) = de.load_any_object_header()?;
        if stored_type != "RsProxy" || version > 0 {
            return Err(Error::new(
                ErrorKind::DeserializationError,
                format!("expected an RsProxy of version 0, found '{stored_type}' v{version}"),
            ));
        }
        let name = de.load_string("Name")?;
        let requested_order = de.load_int("Order")?;
        let kriging = KrigingKind::from_u32(de.load_uint("Kriging")?)?;
        let target_r2 = de.load_double("TargetR2")?;

        let term_count = de.load_ullong("TermsNum")? as usize;
        let term_dims = de.load_ullong("TermDims")? as usize;
        let flat_terms = de.load_ullong_vec("Terms")?;
        if flat_terms.len() != term_count * term_dims {
            return Err(Error::new(
                ErrorKind::DeserializationError,
                "polynomial term table has inconsistent shape",
            ));
        }
        let terms: Vec<Vec<u8>> = flat_terms
            .chunks(term_dims.max(1))
            .take(term_count)
            .map(|chunk| chunk.iter().map(|&e| e as u8).collect())
            .collect();

        let coefficients = load_matrix(de, "Coefficients")?;
        let training_scaled = load_matrix(de, "Training")?;
        let kriging_weights = load_matrix(de, "KrigingWeights")?;
        let kriging_theta = de.load_double("KrigingTheta")?;
        let kernel_dims: Vec<bool> = de
            .load_ullong_vec("KernelDims")?
            .into_iter()
            .map(|b| b != 0)
            .collect();
        let target_layout: Vec<usize> = de
            .load_ullong_vec("TargetLayout")?
            .into_iter()
            .map(|d| d as usize)
            .collect();

        Ok(Self {
            name,
            requested_order,
            kriging,
            target_r2,
            terms,
            coefficients,
            training_scaled,
            kriging_weights,
            kriging_theta,
            kernel_dims,
            target_layout,
        })
    }
}

fn save_matrix(ser: &mut Serializer, matrix: &Array2<f64>, name: &str) -> Result<()> {
    ser.save_ullong(matrix.nrows() as u64, &format!("{name}Rows"))?;
    let flat: Vec<f64> = matrix.iter().copied().collect();
    ser.save_double_vec(&flat, name)
}

fn load_matrix(de: &mut Deserializer, name: &str) -> Result<Array2<f64>> {
    let rows = de.load_ullong(&format!("{name}Rows"))? as usize;
    let flat = de.load_double_vec(name)?;
    let cols = if rows == 0 { 0 } else { flat.len() / rows };
    Array2::from_shape_vec((rows, cols), flat).map_err(|err| {
        Error::new(
            ErrorKind::DeserializationError,
            format!("matrix '{name}' has inconsistent shape: {err}"),
        )
    })
}

fn mean_pairwise_distance(proxy: &RsProxy) -> f64 {
    let n = proxy.training_scaled.nrows();
    let mut total = 0.0;
    let mut count = 0_usize;
    for a in 0..n {
        for b in a + 1..n {
            total += proxy.kernel_distance(
                &proxy.training_scaled.row(a).to_vec(),
                &proxy.training_scaled.row(b).to_vec(),
            );
            count += 1;
        }
    }
    if count == 0 || total <= 0.0 {
        1.0
    } else {
        total / f64_from_usize(count)
    }
}

// greedy add/drop term search maximizing blind adjusted R-squared over
// repeated 75/25 training/blind splits
fn auto_search_terms(x: &Array2<f64>, y: &Array2<f64>, target_r2: f64) -> Result<Vec<Vec<u8>>> {
    const IMPROVEMENT: f64 = 1e-4;

    let dims = x.ncols();
    let pool = monomials(dims, 3);
    let mut current: Vec<Vec<u8>> = vec![vec![0; dims]];
    let mut best = score_terms(x, y, &current)?;

    loop {
        if best >= target_r2 {
            break;
        }
        let mut best_candidate: Option<(f64, usize)> = None;
        for (i, term) in pool.iter().enumerate() {
            if current.contains(term) {
                continue;
            }
            let mut candidate = current.clone();
            candidate.push(term.clone());
            if candidate.len() * 4 > x.nrows() * 3 {
                // keep the 75% training split overdetermined
                continue;
            }
            if let Ok(score) = score_terms(x, y, &candidate) {
                if best_candidate.is_none() || score > best_candidate.unwrap().0 {
                    best_candidate = Some((score, i));
                }
            }
        }
        match best_candidate {
            Some((score, i)) if score > best + IMPROVEMENT => {
                current.push(pool[i].clone());
                best = score;
            }
            _ => break,
        }
    }

    // one drop pass: remove terms whose absence does not hurt
    let mut index = 1;
    while index < current.len() {
        let mut candidate = current.clone();
        candidate.remove(index);
        match score_terms(x, y, &candidate) {
            Ok(score) if score + IMPROVEMENT >= best => {
                current = candidate;
                best = best.max(score);
            }
            _ => index += 1,
        }
    }
    Ok(current)
}

fn score_terms(x: &Array2<f64>, y: &Array2<f64>, terms: &[Vec<u8>]) -> Result<f64> {
    let rows = x.nrows();
    let train_size = ((rows * 3) / 4).max(terms.len()).min(rows);
    let mut rng = Pcg64Mcg::seed_from_u64(AUTO_SEARCH_SEED);
    let mut total = 0.0;
    let mut splits = 0_usize;

    for _ in 0..AUTO_SEARCH_SPLITS {
        let mut order: Vec<usize> = (0..rows).collect();
        for i in (1..rows).rev() {
            order.swap(i, rng.gen_range(0..=i));
        }
        let (train, blind) = order.split_at(train_size);
        let blind: &[usize] = if blind.is_empty() { train } else { blind };

        let mut score_sum = 0.0;
        let mut score_count = 0_usize;
        for t in 0..y.ncols() {
            let train_rows: Vec<usize> =
                train.iter().copied().filter(|&r| y[[r, t]].is_finite()).collect();
            if train_rows.len() < terms.len() {
                return Err(Error::new(
                    ErrorKind::RsProxyError,
                    "training split too small for the candidate term set",
                ));
            }
            let mut a = Array2::zeros((train_rows.len(), terms.len()));
            let mut b = Array1::zeros(train_rows.len());
            for (i, &r) in train_rows.iter().enumerate() {
                let point: Vec<f64> = x.row(r).to_vec();
                for (c, term) in terms.iter().enumerate() {
                    a[[i, c]] = eval_term(term, &point);
                }
                b[i] = y[[r, t]];
            }
            let coeff = lsq::solve(&a, &b)?;

            let blind_rows: Vec<usize> =
                blind.iter().copied().filter(|&r| y[[r, t]].is_finite()).collect();
            if blind_rows.is_empty() {
                continue;
            }
            let mean: f64 =
                blind_rows.iter().map(|&r| y[[r, t]]).sum::<f64>() / f64_from_usize(blind_rows.len());
            let mut sse = 0.0;
            let mut ssyy = 0.0;
            for &r in &blind_rows {
                let point: Vec<f64> = x.row(r).to_vec();
                let prediction: f64 = terms
                    .iter()
                    .zip(coeff.iter())
                    .map(|(term, &c)| eval_term(term, &point) * c)
                    .sum();
                sse += (y[[r, t]] - prediction).powi(2);
                ssyy += (y[[r, t]] - mean).powi(2);
            }
            let r2 = if ssyy > f64::EPSILON { 1.0 - sse / ssyy } else { 1.0 };
            let n = f64_from_usize(blind_rows.len());
            let k = f64_from_usize(terms.len());
            let adjusted = if n - k > 1.0 {
                (n - 1.0).mul_add(-(1.0 - r2), n - k) / (n - k)
            } else {
                r2
            };
            score_sum += adjusted;
            score_count += 1;
        }
        if score_count > 0 {
            total += score_sum / f64_from_usize(score_count);
            splits += 1;
        }
    }

    if splits == 0 {
        Err(Error::new(
            ErrorKind::RsProxyError,
            "no usable split while scoring the candidate term set",
        ))
    } else {
        Ok(total / f64_from_usize(splits))
    }
}

/// Named collection of the proxies of one scenario.
#[derive(Debug, Default)]
pub struct RsProxySet {
    proxies: Vec<RsProxy>,
}

impl RsProxySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of proxies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Returns `true` when the set holds no proxy.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Proxy names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.proxies.iter().map(RsProxy::name).collect()
    }

    /// Proxy by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RsProxy> {
        self.proxies.iter().find(|p| p.name() == name)
    }

    /// Mutable proxy by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut RsProxy> {
        self.proxies.iter_mut().find(|p| p.name() == name)
    }

    /// Adds a proxy; names must be unique.
    pub fn add(&mut self, proxy: RsProxy) -> Result<()> {
        if self.get(proxy.name()).is_some() {
            return Err(Error::new(
                ErrorKind::AlreadyDefined,
                format!("proxy '{}' already defined", proxy.name()),
            ));
        }
        self.proxies.push(proxy);
        Ok(())
    }

    /// Iterator over all proxies in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RsProxy> {
        self.proxies.iter()
    }
}
