//! Parameter-sensitivity calculators.
//!
//! Tornado diagrams report, per observable component, the observable swing
//! when one parameter moves from base to its bounds while all others stay
//! at base; the underlying surface is a first-order proxy with global
//! kriging trained on the Tornado experiment, so the evaluation points
//! coincide with the simulated ones. Pareto diagrams accumulate the
//! absolute swings over all observables into a descending, normalized
//! ranking. Both return plain data; plotting is out of scope.

use super::case::RunCaseSet;
use super::error::{Error, ErrorKind, Result};
use super::proxy::{KrigingKind, RsProxy};
use super::space::{ObservableSpace, ParameterSpace};
use super::parameter::VarParameterOps;

/// Sensitivity of one observable component to every parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct TornadoSensitivity {
    /// Observable position in the observable space.
    pub observable_index: usize,
    /// Component inside the observable.
    pub component: usize,
    /// Proxy value at the base case.
    pub reference_value: f64,
    /// Parameter names, in parameter-space order.
    pub parameter_names: Vec<String>,
    /// Absolute swings per parameter: observable at the parameter minimum
    /// and maximum, both relative to the base value.
    pub sensitivities: Vec<(f64, f64)>,
    /// Swings in percent of the reference value.
    pub relative_sensitivities: Vec<(f64, f64)>,
}

impl TornadoSensitivity {
    /// Smallest absolute swing of parameter `parameter`.
    #[must_use]
    pub fn min_abs_sensitivity(&self, parameter: usize) -> f64 {
        let (low, high) = self.sensitivities[parameter];
        low.abs().min(high.abs())
    }

    /// Largest absolute swing of parameter `parameter`.
    #[must_use]
    pub fn max_abs_sensitivity(&self, parameter: usize) -> f64 {
        let (low, high) = self.sensitivities[parameter];
        low.abs().max(high.abs())
    }
}

/// Cumulative parameter ranking over all observables.
#[derive(Clone, Debug, PartialEq)]
pub struct ParetoSensitivity {
    /// Parameter indices sorted by descending sensitivity.
    pub parameter_order: Vec<usize>,
    /// Parameter names in ranked order.
    pub parameter_names: Vec<String>,
    /// Normalized individual sensitivities, ranked order, summing to 1.
    pub sensitivities: Vec<f64>,
    /// Running sum of the ranked sensitivities.
    pub cumulative: Vec<f64>,
}

impl ParetoSensitivity {
    /// Parameters that together reach at least the given cumulative
    /// sensitivity fraction.
    #[must_use]
    pub fn parameters_with_cumulative_impact(&self, fraction: f64) -> Vec<usize> {
        let mut result = Vec::new();
        for (rank, &cumulative) in self.cumulative.iter().enumerate() {
            result.push(self.parameter_order[rank]);
            if cumulative >= fraction {
                break;
            }
        }
        result
    }
}

/// Computes Tornado and Pareto diagrams from completed experiments.
#[derive(Clone, Copy, Debug, Default)]
pub struct SensitivityCalculator;

fn swings_per_parameter(
    proxy: &RsProxy,
    space: &ParameterSpace,
) -> Result<(Vec<f64>, Vec<Vec<(f64, f64)>>)> {
    let base = space.base_as_doubles();
    let reference = proxy.evaluate_vector(&base, space, true)?;

    // per parameter: observable vector at its min and its max bound
    let mut swings = Vec::with_capacity(space.len());
    let mut offset = 0;
    for parameter in space.iter() {
        let dim = parameter.dimension();
        let mut at_min = base.clone();
        let mut at_max = base.clone();
        at_min[offset..offset + dim].copy_from_slice(&parameter.min_as_doubles());
        at_max[offset..offset + dim].copy_from_slice(&parameter.max_as_doubles());

        let low = proxy.evaluate_vector(&at_min, space, true)?;
        let high = proxy.evaluate_vector(&at_max, space, true)?;
        swings.push(
            reference
                .iter()
                .zip(low.iter().zip(&high))
                .map(|(&r, (&l, &h))| (l - r, h - r))
                .collect(),
        );
        offset += dim;
    }
    Ok((reference, swings))
}

impl SensitivityCalculator {
    /// Trains a first-order global-kriging proxy over the given experiments
    /// and returns one Tornado record per observable component.
    pub fn calculate_tornado(
        case_set: &RunCaseSet,
        labels: &[String],
        space: &ParameterSpace,
        observables: &ObservableSpace,
    ) -> Result<Vec<TornadoSensitivity>> {
        let cases = case_set.completed_cases(labels);
        if cases.is_empty() {
            return Err(Error::new(
                ErrorKind::UndefinedValue,
                "no completed cases in the requested experiments",
            ));
        }
        let mut proxy = RsProxy::new("tornado", 1, KrigingKind::Global, 1.0)?;
        proxy.calculate(&cases, space)?;

        let parameter_names: Vec<String> =
            space.iter().map(|p| p.name().to_owned()).collect();
        let (reference, swings) = swings_per_parameter(&proxy, space)?;

        let mut result = Vec::new();
        let mut flat = 0;
        for (observable_index, observable) in observables.iter().enumerate() {
            for component in 0..observable.dimension() {
                let reference_value = reference[flat];
                let sensitivities: Vec<(f64, f64)> =
                    swings.iter().map(|per_obs| per_obs[flat]).collect();
                let relative_sensitivities = sensitivities
                    .iter()
                    .map(|&(low, high)| {
                        let scale = reference_value.abs().max(f64::EPSILON);
                        (100.0 * low / scale, 100.0 * high / scale)
                    })
                    .collect();
                result.push(TornadoSensitivity {
                    observable_index,
                    component,
                    reference_value,
                    parameter_names: parameter_names.clone(),
                    sensitivities,
                    relative_sensitivities,
                });
                flat += 1;
            }
        }
        Ok(result)
    }

    /// Accumulates absolute swings over all observables, weighted by their
    /// sensitivity-analysis weights, into a descending normalized ranking.
    pub fn calculate_pareto(
        proxy: &RsProxy,
        space: &ParameterSpace,
        observables: &ObservableSpace,
    ) -> Result<ParetoSensitivity> {
        let (_, swings) = swings_per_parameter(proxy, space)?;

        let mut weights = Vec::new();
        for observable in observables.iter() {
            weights.extend(std::iter::repeat(observable.sa_weight()).take(observable.dimension()));
        }

        let mut totals: Vec<f64> = swings
            .iter()
            .map(|per_obs| {
                per_obs
                    .iter()
                    .zip(&weights)
                    .map(|(&(low, high), &w)| w * low.abs().max(high.abs()))
                    .sum()
            })
            .collect();

        let grand_total: f64 = totals.iter().sum();
        if grand_total > 0.0 {
            for total in &mut totals {
                *total /= grand_total;
            }
        }

        let mut parameter_order: Vec<usize> = (0..totals.len()).collect();
        parameter_order.sort_by(|&a, &b| {
            totals[b]
                .partial_cmp(&totals[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let sensitivities: Vec<f64> = parameter_order.iter().map(|&i| totals[i]).collect();
        let mut cumulative = Vec::with_capacity(sensitivities.len());
        let mut running = 0.0;
        for &value in &sensitivities {
            running += value;
            cumulative.push(running);
        }
        let parameter_names = parameter_order
            .iter()
            .map(|&i| space.get(i).map_or_else(String::new, |p| p.name().to_owned()))
            .collect();

        Ok(ParetoSensitivity {
            parameter_order,
            parameter_names,
            sensitivities,
            cumulative,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{RunCase, RunStatus};
    use crate::doe::{DoeAlgorithm, DoeGenerator};
    use crate::observable::{Locator, Observable, ObsValue};
    use crate::parameter::{PdfShape, ScalarVarParameter, SimpleRange};
    use float_cmp::assert_approx_eq;

    fn scenario() -> (ParameterSpace, ObservableSpace, RunCaseSet) {
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

        let mut observables = ObservableSpace::new();
        observables
            .add(Observable::new(
                "Temp@2000m",
                "Temperature",
                0.0,
                Locator::PointXyz {
                    x: 0.0,
                    y: 0.0,
                    z: 2000.0,
                },
            ))
            .unwrap();

        let mut set = RunCaseSet::new();
        DoeGenerator::new(DoeAlgorithm::Tornado)
            .generate(&space, &mut set, 0, "Tornado")
            .unwrap();
        // simulate: observable dominated by A
        for case in set.iter_mut() {
            let values = case.flattened_parameters();
            let y = 50.0 + 4.0 * values[0] + 1.0 * values[1];
            case.set_observables(vec![ObsValue::new(vec![y])]);
            case.set_status(RunStatus::Scheduled).unwrap();
            case.set_status(RunStatus::Running).unwrap();
            case.set_status(RunStatus::Completed).unwrap();
        }
        (space, observables, set)
    }

    #[test]
    fn tornado_swings_match_the_linear_response() {
        let (space, observables, set) = scenario();
        let result = SensitivityCalculator::calculate_tornado(
            &set,
            &["Tornado".to_owned()],
            &space,
            &observables,
        )
        .unwrap();

        assert_eq!(result.len(), 1);
        let tornado = &result[0];
        assert_approx_eq!(
            f64,
            tornado.reference_value,
            50.0 + 4.0 * 25.0 + 2.05,
            epsilon = 1e-6
        );
        // A: 4 * (10-25) and 4 * (40-25); B: 1 * (0.1-2.05) and 1 * (4-2.05)
        let (a_low, a_high) = tornado.sensitivities[0];
        assert_approx_eq!(f64, a_low, -60.0, epsilon = 1e-6);
        assert_approx_eq!(f64, a_high, 60.0, epsilon = 1e-6);
        let (b_low, b_high) = tornado.sensitivities[1];
        assert_approx_eq!(f64, b_low, -1.95, epsilon = 1e-6);
        assert_approx_eq!(f64, b_high, 1.95, epsilon = 1e-6);
        assert!(tornado.max_abs_sensitivity(0) > tornado.max_abs_sensitivity(1));
    }

    #[test]
    fn pareto_ranks_the_dominant_parameter_first() {
        let (space, observables, set) = scenario();
        let cases = set.completed_cases(&[]);
        let mut proxy = RsProxy::new("pareto", 1, KrigingKind::Global, 1.0).unwrap();
        proxy.calculate(&cases, &space).unwrap();

        let pareto =
            SensitivityCalculator::calculate_pareto(&proxy, &space, &observables).unwrap();

        assert_eq!(pareto.parameter_order[0], 0);
        assert_eq!(pareto.parameter_names[0], "A");
        assert_approx_eq!(f64, pareto.cumulative.last().copied().unwrap(), 1.0, epsilon = 1e-9);
        assert!(pareto.sensitivities[0] > 0.9);

        let dominant = pareto.parameters_with_cumulative_impact(0.8);
        assert_eq!(dominant, vec![0]);
    }

    #[test]
    fn tornado_needs_completed_cases() {
        let (space, observables, _) = scenario();
        let empty = RunCaseSet::new();
        let err = SensitivityCalculator::calculate_tornado(
            &empty,
            &[],
            &space,
            &observables,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndefinedValue);
    }
}
