//! Regression-quality metrics for response-surface proxies.
//!
//! `R² = 1 - Σ(y-ŷ)²/Σ(y-ȳ)²` and `R²adj = 1 - (1-R²)(n-1)/(n-k)` are
//! computed per observable component over the training cases; `Q²` is the
//! leave-one-out analogue, rebuilding the proxy once per case at the fixed
//! outer polynomial order and kriging mode. The leave-one-out rebuild is
//! expected to dominate cost.

use super::case::RunCase;
use super::error::{Error, ErrorKind, Result};
use super::proxy::{KrigingKind, RsProxy};
use super::space::ParameterSpace;

fn column_averages(matrix: &[Vec<f64>]) -> Vec<f64> {
    let columns = matrix.first().map_or(0, Vec::len);
    let mut averages = vec![0.0; columns];
    let mut counts = vec![0_usize; columns];
    for row in matrix {
        for (j, val) in row.iter().enumerate() {
            if val.is_finite() {
                averages[j] += val;
                counts[j] += 1;
            }
        }
    }
    for (avg, count) in averages.iter_mut().zip(counts) {
        if count > 0 {
            *avg /= count as f64;
        }
    }
    averages
}

// Σ(y-ŷ)² / Σ(y-ȳ)² for one component, or None for zero variance
fn sse_over_ssyy(
    component: usize,
    simulated: &[Vec<f64>],
    predicted: &[Vec<f64>],
    average: f64,
) -> Option<f64> {
    let mut sse = 0.0;
    let mut ssyy = 0.0;
    for (sim, pred) in simulated.iter().zip(predicted) {
        let y = sim[component];
        let y_hat = pred[component];
        if !y.is_finite() || !y_hat.is_finite() {
            continue;
        }
        sse += (y - y_hat).powi(2);
        ssyy += (y - average).powi(2);
    }
    (ssyy.abs() > f64::EPSILON).then(|| sse / ssyy)
}

/// R² and adjusted R² per observable component from simulated values,
/// proxy predictions and the proxy coefficient count.
///
/// Components with zero variance across the cases report 0.
#[must_use]
pub fn r2_and_adjusted(
    simulated: &[Vec<f64>],
    predicted: &[Vec<f64>],
    coefficient_count: usize,
) -> (Vec<f64>, Vec<f64>) {
    let components = simulated.first().map_or(0, Vec::len);
    let cases = simulated.len() as f64;
    let averages = column_averages(simulated);

    let mut r2 = vec![0.0; components];
    let mut adjusted = vec![0.0; components];
    for j in 0..components {
        if let Some(ratio) = sse_over_ssyy(j, simulated, predicted, averages[j]) {
            r2[j] = 1.0 - ratio;
            let denominator = cases - coefficient_count as f64;
            if denominator > 0.0 {
                adjusted[j] = 1.0 - ratio * (cases - 1.0) / denominator;
            }
        }
    }
    (r2, adjusted)
}

/// Q² per observable component from simulated values and leave-one-out
/// predictions.
#[must_use]
pub fn q2_from_observables(simulated: &[Vec<f64>], loo_predicted: &[Vec<f64>]) -> Vec<f64> {
    let components = simulated.first().map_or(0, Vec::len);
    let averages = column_averages(simulated);
    (0..components)
        .map(|j| {
            sse_over_ssyy(j, simulated, loo_predicted, averages[j]).map_or(0.0, |ratio| 1.0 - ratio)
        })
        .collect()
}

fn flatten_observables(case: &RunCase) -> Vec<f64> {
    case.observables()
        .iter()
        .flat_map(|obs| obs.values().iter().copied())
        .collect()
}

/// Quality calculator over a fitted proxy and its training cases.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyQuality;

impl ProxyQuality {
    /// R² and adjusted R² of `proxy` over `cases`.
    pub fn r2(
        proxy: &RsProxy,
        cases: &[&RunCase],
        space: &ParameterSpace,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        if cases.is_empty() {
            return Err(Error::new(
                ErrorKind::RsProxyError,
                "no completed cases to compute regression quality on",
            ));
        }
        let mut simulated = Vec::with_capacity(cases.len());
        let mut predicted = Vec::with_capacity(cases.len());
        for case in cases {
            let mut probe = (*case).clone();
            proxy.evaluate(&mut probe, space)?;
            simulated.push(flatten_observables(case));
            predicted.push(flatten_observables(&probe));
        }
        Ok(r2_and_adjusted(
            &simulated,
            &predicted,
            proxy.coefficient_count(),
        ))
    }

    /// Q² of a proxy configuration over `cases`: one rebuild per left-out
    /// case at the fixed order and kriging mode.
    pub fn q2(
        order: i32,
        kriging: KrigingKind,
        cases: &[&RunCase],
        space: &ParameterSpace,
    ) -> Result<Vec<f64>> {
        if cases.len() < 2 {
            return Err(Error::new(
                ErrorKind::RsProxyError,
                "leave-one-out quality needs at least two completed cases",
            ));
        }
        let mut simulated = Vec::with_capacity(cases.len());
        let mut predicted = Vec::with_capacity(cases.len());
        for leave_out in 0..cases.len() {
            let subset: Vec<&RunCase> = cases
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != leave_out)
                .map(|(_, case)| *case)
                .collect();
            let mut rebuilt = RsProxy::new("loo", order, kriging, 1.0)?;
            rebuilt.calculate(&subset, space)?;

            let mut probe = cases[leave_out].clone();
            rebuilt.evaluate(&mut probe, space)?;
            simulated.push(flatten_observables(cases[leave_out]));
            predicted.push(flatten_observables(&probe));
        }
        Ok(q2_from_observables(&simulated, &predicted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::RunCase;
    use crate::observable::ObsValue;
    use crate::parameter::{PdfShape, ScalarVarParameter, SimpleRange};
    use float_cmp::assert_approx_eq;

    #[test]
    fn perfect_fit_reports_unity() {
        let simulated = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let (r2, adjusted) = r2_and_adjusted(&simulated, &simulated, 2);
        assert_approx_eq!(f64, r2[0], 1.0, ulps = 2);
        assert_approx_eq!(f64, adjusted[0], 1.0, ulps = 2);
    }

    #[test]
    fn known_residuals_match_the_formula() {
        let simulated = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let predicted = vec![vec![1.1], vec![1.9], vec![3.1], vec![3.9]];
        let (r2, adjusted) = r2_and_adjusted(&simulated, &predicted, 2);

        let sse = 4.0 * 0.1 * 0.1;
        let ssyy = 5.0;
        assert_approx_eq!(f64, r2[0], 1.0 - sse / ssyy, ulps = 8);
        assert_approx_eq!(
            f64,
            adjusted[0],
            1.0 - (sse / ssyy) * 3.0 / 2.0,
            ulps = 8
        );
    }

    #[test]
    fn zero_variance_component_reports_zero() {
        let simulated = vec![vec![2.0], vec![2.0]];
        let predicted = vec![vec![2.0], vec![2.0]];
        let (r2, _) = r2_and_adjusted(&simulated, &predicted, 1);
        assert_approx_eq!(f64, r2[0], 0.0, ulps = 2);
    }

    fn space_and_cases() -> (ParameterSpace, Vec<RunCase>) {
        let mut space = ParameterSpace::new();
        space
            .add(
                ScalarVarParameter::new(
                    "A",
                    "TblA:ColA",
                    0,
                    SimpleRange::new(0.0, 10.0).unwrap(),
                    5.0,
                    PdfShape::Block,
                )
                .unwrap()
                .into(),
            )
            .unwrap();

        let cases = [0.0, 2.0, 4.0, 6.0, 8.0, 10.0]
            .iter()
            .enumerate()
            .map(|(id, &a)| {
                let mut case = RunCase::new(id, space.bind_parameters(&[a]).unwrap());
                case.set_observables(vec![ObsValue::new(vec![1.0 + 2.0 * a])]);
                case
            })
            .collect();
        (space, cases)
    }

    #[test]
    fn linear_observable_gets_perfect_q2() {
        let (space, cases) = space_and_cases();
        let refs: Vec<&RunCase> = cases.iter().collect();
        let q2 = ProxyQuality::q2(1, KrigingKind::None, &refs, &space).unwrap();
        assert_approx_eq!(f64, q2[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn proxy_r2_matches_direct_evaluation() {
        let (space, cases) = space_and_cases();
        let refs: Vec<&RunCase> = cases.iter().collect();
        let mut proxy = RsProxy::new("lin", 1, KrigingKind::None, 0.95).unwrap();
        proxy.calculate(&refs, &space).unwrap();

        let (r2, adjusted) = ProxyQuality::r2(&proxy, &refs, &space).unwrap();
        assert_approx_eq!(f64, r2[0], 1.0, epsilon = 1e-9);
        assert_approx_eq!(f64, adjusted[0], 1.0, epsilon = 1e-9);
    }
}
