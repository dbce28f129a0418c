//! Monte-Carlo and Markov-Chain Monte-Carlo sampling of a response
//! surface.
//!
//! The solver evolves an ensemble of sampling points in scaled parameter
//! space: Metropolis-Hastings steps for MC/MCMC, survival-of-the-fittest
//! for the local optimiser. MCMC conditions the posterior on every
//! observable carrying a reference value; plain MC samples the prior
//! alone. Collected results are run cases sorted by ascending RMSE against
//! the reference measurements, plus the P10 to P90 CDF per observable
//! component, the goodness-of-fit and a proposed standard-deviation
//! factor.

use super::case::{RunCase, RunStatus};
use super::convert::f64_from_usize;
use super::error::{Error, ErrorKind, Result};
use super::observable::ObsValue;
use super::parameter::{log_marginal_density, PdfShape, VarParameterOps};
use super::proxy::{KrigingKind, RsProxy};
use super::serial::{Deserializer, Serializer};
use super::space::{ObservableSpace, ParameterSpace};
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// Fixed seed of the sampling chain.
const MC_SEED: u64 = 0x9e3779b97f4a7c15;

/// Scaled-space step width of the proposal distribution.
const PROPOSAL_STEP: f64 = 0.1;

/// Sampling algorithms.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum McAlgorithm {
    /// Independent prior sampling, no reference conditioning. The default.
    MonteCarlo,
    /// Posterior sampling conditioned on reference-valued observables.
    Mcmc,
    /// Deterministic survival-of-the-fittest local optimiser.
    McLocalSolver,
}

/// Kriging usage during sampling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum McKriging {
    /// Polynomial proxy evaluations only. The default.
    None,
    /// Kriging on some steps; evaluated as full kriging here.
    Smart,
    /// Kriging on every proxy evaluation.
    Global,
}

/// Prior over the variable parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PriorKind {
    /// Uniform between the bounds.
    None,
    /// Per-parameter marginal PDF as declared on the definitions.
    Marginal,
    /// Independent Gaussian marginals centred on the base case.
    Multivariate,
}

/// Distribution of the reference measurements.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MeasurementKind {
    /// Measurements do not enter the posterior.
    None,
    /// Gaussian residuals; required for the GOF indicator.
    Normal,
    /// Laplace residuals, robust against outliers.
    Robust,
    /// Gaussian core with Laplace tails beyond two deviations.
    Mixed,
}

fn enum_to_u32<T: Copy>(val: T, table: &[(T, u32)]) -> u32
where
    T: PartialEq,
{
    table
        .iter()
        .find(|(v, _)| *v == val)
        .map(|(_, id)| *id)
        .expect("enum value present in its id table")
}

fn enum_from_u32<T: Copy>(id: u32, table: &[(T, u32)], what: &str) -> Result<T> {
    table
        .iter()
        .find(|(_, i)| *i == id)
        .map(|(v, _)| *v)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::DeserializationError,
                format!("unknown {what} id {id}"),
            )
        })
}

const ALGORITHM_IDS: &[(McAlgorithm, u32)] = &[
    (McAlgorithm::MonteCarlo, 0),
    (McAlgorithm::Mcmc, 1),
    (McAlgorithm::McLocalSolver, 2),
];
const KRIGING_IDS: &[(McKriging, u32)] = &[
    (McKriging::None, 0),
    (McKriging::Smart, 1),
    (McKriging::Global, 2),
];
const PRIOR_IDS: &[(PriorKind, u32)] = &[
    (PriorKind::None, 0),
    (PriorKind::Marginal, 1),
    (PriorKind::Multivariate, 2),
];
const MEASUREMENT_IDS: &[(MeasurementKind, u32)] = &[
    (MeasurementKind::None, 0),
    (MeasurementKind::Normal, 1),
    (MeasurementKind::Robust, 2),
    (MeasurementKind::Mixed, 3),
];

// one reference-valued observable component wrapped as a proxy target
#[derive(Clone, Debug)]
struct Target {
    flat_index: usize,
    reference: f64,
    std_dev: f64,
    weight: f64,
}

// live chain state between prepare and collect
struct Chain {
    rng: Pcg64Mcg,
    points: Vec<Vec<f64>>,
    log_posterior: Vec<f64>,
    steps_done: usize,
    max_steps: usize,
}

/// The Monte-Carlo solver of one scenario.
pub struct McSolver {
    algorithm: McAlgorithm,
    kriging: McKriging,
    prior: PriorKind,
    measurement: MeasurementKind,
    std_dev_factor: f64,
    gof: f64,
    chi2_reduced: f64,
    // sampling configuration captured by prepare
    targets: Vec<Target>,
    pdf_shapes: Vec<PdfShape>,
    pdf_modes: Vec<f64>,
    bounds: Vec<(f64, f64)>,
    use_kriging: bool,
    chain: Option<Chain>,
    results: Vec<(f64, RunCase)>,
    cdf: Vec<Vec<f64>>,
}

impl McSolver {
    /// Creates a solver with the given configuration.
    #[must_use]
    pub fn new(
        algorithm: McAlgorithm,
        kriging: McKriging,
        prior: PriorKind,
        measurement: MeasurementKind,
    ) -> Self {
        Self {
            algorithm,
            kriging,
            prior,
            measurement,
            std_dev_factor: 1.0,
            gof: 0.0,
            chi2_reduced: 0.0,
            targets: Vec::new(),
            pdf_shapes: Vec::new(),
            pdf_modes: Vec::new(),
            bounds: Vec::new(),
            use_kriging: false,
            chain: None,
            results: Vec::new(),
            cdf: Vec::new(),
        }
    }

    /// Configured sampling algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> McAlgorithm {
        self.algorithm
    }

    /// Configured kriging usage.
    #[must_use]
    pub const fn kriging(&self) -> McKriging {
        self.kriging
    }

    /// Configured prior.
    #[must_use]
    pub const fn prior_distribution(&self) -> PriorKind {
        self.prior
    }

    /// Configured measurement distribution.
    #[must_use]
    pub const fn measurement_distribution(&self) -> MeasurementKind {
        self.measurement
    }

    /// Goodness of fit in percent; preferably above 50.
    #[must_use]
    pub const fn gof(&self) -> f64 {
        self.gof
    }

    /// The standard-deviation scaling applied to the measurement errors.
    #[must_use]
    pub const fn std_dev_factor(&self) -> f64 {
        self.std_dev_factor
    }

    /// Factor `sqrt(chi2)` proposed when the GOF falls below 50 percent;
    /// 1 for non-MCMC algorithms.
    #[must_use]
    pub fn proposed_std_dev_factor(&self) -> f64 {
        if self.algorithm == McAlgorithm::Mcmc {
            self.chi2_reduced.sqrt()
        } else {
            1.0
        }
    }

    /// Sampling points with their RMSE, sorted ascending.
    #[must_use]
    pub fn results(&self) -> &[(f64, RunCase)] {
        &self.results
    }

    /// P10 to P90 percentile points per observable component.
    #[must_use]
    pub fn cdf(&self) -> &[Vec<f64>] {
        &self.cdf
    }

    /// Builds the internal solver without running it.
    ///
    /// `sampling_space` optionally narrows the box constraints below the
    /// proxy parameter space.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_simulation(
        &mut self,
        proxy: &RsProxy,
        proxy_space: &ParameterSpace,
        sampling_space: Option<&ParameterSpace>,
        observables: &ObservableSpace,
        num_samples: usize,
        max_steps: usize,
        std_dev_factor: f64,
    ) -> Result<()> {
        if !proxy.is_fitted() {
            return Err(Error::new(
                ErrorKind::NonexistingId,
                "unprepared proxy given for MC/MCMC",
            ));
        }
        if num_samples == 0 || max_steps == 0 {
            return Err(Error::new(
                ErrorKind::MonteCarloSolverError,
                "sample count and step count must be positive",
            ));
        }
        self.std_dev_factor = std_dev_factor;

        // a kriging-free proxy paired with a kriging-enabled sampler (or the
        // reverse) degrades to the weaker of the two settings
        self.use_kriging = proxy.kriging() != KrigingKind::None && self.kriging != McKriging::None;
        if !self.use_kriging && (proxy.kriging() != KrigingKind::None || self.kriging != McKriging::None)
        {
            log::warn!("kriging settings of proxy and sampler disagree, sampling without kriging");
        }

        // wrap reference-valued observables as constrained targets
        self.targets.clear();
        let mut flat_index = 0;
        for observable in observables.iter() {
            if let Some(reference) = observable.reference() {
                for (component, (&value, &std_dev)) in reference
                    .values
                    .iter()
                    .zip(&reference.std_deviations)
                    .enumerate()
                {
                    self.targets.push(Target {
                        flat_index: flat_index + component,
                        reference: value,
                        std_dev: std_dev.max(f64::MIN_POSITIVE),
                        weight: observable.ua_weight(),
                    });
                }
            }
            flat_index += observable.dimension();
        }
        if self.algorithm == McAlgorithm::Mcmc && self.targets.is_empty() {
            return Err(Error::new(
                ErrorKind::MonteCarloSolverError,
                "MCMC needs at least one observable with a reference value",
            ));
        }

        // scaled parameter PDF
        let dims = proxy_space.total_dimension();
        self.pdf_shapes.clear();
        for parameter in proxy_space.iter() {
            let shape = match self.prior {
                PriorKind::Multivariate => PdfShape::Normal,
                _ => parameter.pdf_shape(),
            };
            self.pdf_shapes
                .extend(std::iter::repeat(shape).take(parameter.dimension()));
        }
        self.pdf_modes = proxy_space.scale(&proxy_space.base_as_doubles());

        // box constraints: the sampling space may narrow the proxy space
        self.bounds = vec![(-1.0, 1.0); dims];
        if let Some(narrowed) = sampling_space {
            if narrowed.total_dimension() != dims {
                return Err(Error::new(
                    ErrorKind::MonteCarloSolverError,
                    "sampling space dimension differs from the proxy parameter space",
                ));
            }
            let lo = proxy_space.scale(&narrowed.min_as_doubles());
            let hi = proxy_space.scale(&narrowed.max_as_doubles());
            for (bound, (lo, hi)) in self.bounds.iter_mut().zip(lo.into_iter().zip(hi)) {
                bound.0 = bound.0.max(lo.min(hi));
                bound.1 = bound.1.min(hi.max(lo));
            }
        }

        // spread the initial ensemble uniformly inside the bounds
        let mut rng = Pcg64Mcg::seed_from_u64(MC_SEED);
        let mut points = Vec::with_capacity(num_samples);
        for _ in 0..num_samples {
            let point: Vec<f64> = self
                .bounds
                .iter()
                .map(|&(lo, hi)| rng.gen_range(lo..=hi))
                .collect();
            points.push(point);
        }
        let log_posterior = points
            .iter()
            .map(|point| self.log_posterior(proxy, proxy_space, point))
            .collect::<Result<Vec<_>>>()?;

        self.chain = Some(Chain {
            rng,
            points,
            log_posterior,
            steps_done: 0,
            max_steps,
        });
        Ok(())
    }

    fn log_likelihood(&self, predictions: &[f64]) -> f64 {
        if self.measurement == MeasurementKind::None || self.algorithm == McAlgorithm::MonteCarlo {
            return 0.0;
        }
        let mut total = 0.0;
        for target in &self.targets {
            let Some(&prediction) = predictions.get(target.flat_index) else {
                continue;
            };
            let residual =
                (prediction - target.reference) / (target.std_dev * self.std_dev_factor);
            let contribution = match self.measurement {
                MeasurementKind::None => 0.0,
                MeasurementKind::Normal => 0.5 * residual * residual,
                MeasurementKind::Robust => residual.abs(),
                MeasurementKind::Mixed => {
                    // gaussian core, laplace tails beyond two deviations
                    if residual.abs() <= 2.0 {
                        0.5 * residual * residual
                    } else {
                        2.0 * residual.abs() - 2.0
                    }
                }
            };
            total -= target.weight * contribution;
        }
        total
    }

    fn log_prior(&self, point: &[f64]) -> f64 {
        match self.prior {
            PriorKind::None => 0.0,
            PriorKind::Marginal | PriorKind::Multivariate => point
                .iter()
                .zip(self.pdf_shapes.iter().zip(&self.pdf_modes))
                .map(|(&u, (&shape, &mode))| log_marginal_density(shape, u, mode))
                .sum(),
        }
    }

    fn log_posterior(
        &self,
        proxy: &RsProxy,
        proxy_space: &ParameterSpace,
        point: &[f64],
    ) -> Result<f64> {
        let flat = proxy_space.unscale(point);
        let predictions = proxy.evaluate_vector(&flat, proxy_space, self.use_kriging)?;
        Ok(self.log_prior(point) + self.log_likelihood(&predictions))
    }

    /// Advances the chain by one epoch.
    ///
    /// Returns the monotonically decreasing number of remaining epochs; the
    /// caller may stop at any point without corrupting state.
    pub fn iterate_once(&mut self, proxy: &RsProxy, proxy_space: &ParameterSpace) -> Result<usize> {
        let Some(mut chain) = self.chain.take() else {
            return Err(Error::new(
                ErrorKind::MonteCarloSolverError,
                "solver is not initialized",
            ));
        };

        let outcome: Result<usize> = (|| {
            for i in 0..chain.points.len() {
                // gaussian proposal by Box-Muller
                let proposal: Vec<f64> = chain.points[i]
                    .iter()
                    .zip(&self.bounds)
                    .map(|(&u, &(lo, hi))| {
                        let u1: f64 = chain.rng.gen_range(f64::MIN_POSITIVE..1.0);
                        let u2: f64 = chain.rng.gen_range(0.0..std::f64::consts::TAU);
                        let z = (-2.0 * u1.ln()).sqrt() * u2.cos();
                        (u + PROPOSAL_STEP * (hi - lo) * 0.5 * z).clamp(lo, hi)
                    })
                    .collect();

                let proposed = self.log_posterior(proxy, proxy_space, &proposal)?;
                let accept = match self.algorithm {
                    McAlgorithm::McLocalSolver => proposed > chain.log_posterior[i],
                    McAlgorithm::MonteCarlo | McAlgorithm::Mcmc => {
                        let ratio = proposed - chain.log_posterior[i];
                        ratio >= 0.0 || chain.rng.gen_range(0.0_f64..1.0).ln() < ratio
                    }
                };
                if accept {
                    chain.points[i] = proposal;
                    chain.log_posterior[i] = proposed;
                }
            }
            chain.steps_done += 1;
            Ok(chain.max_steps.saturating_sub(chain.steps_done))
        })();

        self.chain = Some(chain);
        outcome
    }

    /// Materialises the sampling points into completed run cases with
    /// proxy-evaluated observables, the RMSE ranking, the GOF and the
    /// P10 to P90 CDF. Legal after any number of iterations.
    pub fn collect_results(
        &mut self,
        proxy: &RsProxy,
        proxy_space: &ParameterSpace,
    ) -> Result<()> {
        let Some(chain) = self.chain.as_ref() else {
            return Err(Error::new(
                ErrorKind::MonteCarloSolverError,
                "solver is not initialized",
            ));
        };

        let mut results = Vec::with_capacity(chain.points.len());
        let mut chi2_sum = 0.0;
        for (i, point) in chain.points.iter().enumerate() {
            let flat = proxy_space.unscale(point);
            let predictions = proxy.evaluate_vector(&flat, proxy_space, self.use_kriging)?;

            let mut chi2 = 0.0;
            let mut active = 0_usize;
            for target in &self.targets {
                let Some(&prediction) = predictions.get(target.flat_index) else {
                    continue;
                };
                if !prediction.is_finite() || !target.reference.is_finite() {
                    continue;
                }
                let residual =
                    (prediction - target.reference) / (target.std_dev * self.std_dev_factor);
                chi2 += target.weight * residual * residual;
                active += 1;
            }
            let rmse = if active == 0 {
                0.0
            } else {
                (chi2 / f64_from_usize(active)).sqrt()
            };
            chi2_sum += if active == 0 { 0.0 } else { chi2 / f64_from_usize(active) };

            let mut case = RunCase::new(i, proxy_space.bind_parameters(&flat)?);
            let mut values = Vec::with_capacity(proxy.target_layout().len());
            let mut offset = 0;
            for &dim in proxy.target_layout() {
                values.push(ObsValue::new(predictions[offset..offset + dim].to_vec()));
                offset += dim;
            }
            case.set_observables(values);
            case.set_status(RunStatus::Completed)?;
            results.push((rmse, case));
        }

        results.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        self.chi2_reduced = chi2_sum / f64_from_usize(chain.points.len());
        self.gof = 100.0 / (1.0 + self.chi2_reduced);
        if self.algorithm == McAlgorithm::Mcmc && self.gof < 50.0 {
            log::warn!(
                "MCMC goodness of fit {:.1}% below 50%, proposed std-dev factor {:.3}",
                self.gof,
                self.proposed_std_dev_factor()
            );
        }
        self.results = results;
        self.calculate_p10_to_p90();
        Ok(())
    }

    // sort each observable component independently and pick the nine decile
    // points between P10 and P90
    fn calculate_p10_to_p90(&mut self) {
        self.cdf.clear();
        let Some((_, first)) = self.results.first() else {
            return;
        };
        let samples = self.results.len();

        for (obs_index, obs) in first.observables().iter().enumerate() {
            for component in 0..obs.dimension() {
                let mut values: Vec<f64> = self
                    .results
                    .iter()
                    .filter_map(|(_, case)| {
                        case.obs_value(obs_index)
                            .map(|v| v.values()[component])
                    })
                    .collect();
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

                let mut deciles = Vec::with_capacity(9);
                for j in 0..9 {
                    let key = (((j + 1) * samples) / 10).min(samples - 1);
                    deciles.push(values[key]);
                }
                self.cdf.push(deciles);
            }
        }
    }

    /// Runs prepare, all iterations and collection in one go.
    #[allow(clippy::too_many_arguments)]
    pub fn run_simulation(
        &mut self,
        proxy: &RsProxy,
        proxy_space: &ParameterSpace,
        sampling_space: Option<&ParameterSpace>,
        observables: &ObservableSpace,
        num_samples: usize,
        max_steps: usize,
        std_dev_factor: f64,
    ) -> Result<()> {
        self.prepare_simulation(
            proxy,
            proxy_space,
            sampling_space,
            observables,
            num_samples,
            max_steps,
            std_dev_factor,
        )?;
        while self.iterate_once(proxy, proxy_space)? > 0 {}
        self.collect_results(proxy, proxy_space)
    }

    /// Writes configuration, results, GOF and CDF as one object group.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.begin_object("McSolver", "MCSolver", 0)?;
        ser.save_uint(enum_to_u32(self.algorithm, ALGORITHM_IDS), "Algo")?;
        ser.save_uint(enum_to_u32(self.kriging, KRIGING_IDS), "Kriging")?;
        ser.save_uint(enum_to_u32(self.prior, PRIOR_IDS), "PriorDistr")?;
        ser.save_uint(enum_to_u32(self.measurement, MEASUREMENT_IDS), "MeasurDistr")?;
        ser.save_double(self.std_dev_factor, "StdDevFact")?;
        ser.save_double(self.chi2_reduced, "Chi2Reduced")?;

        ser.save_ullong(self.results.len() as u64, "ResultsSetSize")?;
        for (rmse, case) in &self.results {
            ser.save_double(*rmse, "RMSEVal")?;
            case.save_to(ser)?;
        }
        ser.save_double(self.gof, "GOF")?;

        ser.save_ullong(self.cdf.len() as u64, "CDFSetSize")?;
        for deciles in &self.cdf {
            ser.save_double_vec(deciles, "ObsCDF")?;
        }
        Ok(())
    }

    /// Reads a solver written by [`Self::save_to`]; the live chain is not
    /// part of the state and sampling restarts from `prepare_simulation`.
    pub fn load_from(de: &mut Deserializer) -> Result<Self> {
        de.load_object_header("McSolver", "MCSolver", 0)?;
        let algorithm = enum_from_u32(de.load_uint("Algo")?, ALGORITHM_IDS, "algorithm")?;
        let kriging = enum_from_u32(de.load_uint("Kriging")?, KRIGING_IDS, "kriging")?;
        let prior = enum_from_u32(de.load_uint("PriorDistr")?, PRIOR_IDS, "prior")?;
        let measurement =
            enum_from_u32(de.load_uint("MeasurDistr")?, MEASUREMENT_IDS, "measurement")?;
        let mut result = Self::new(algorithm, kriging, prior, measurement);
        result.std_dev_factor = de.load_double("StdDevFact")?;
        result.chi2_reduced = de.load_double("Chi2Reduced")?;

        let size = de.load_ullong("ResultsSetSize")?;
        for _ in 0..size {
            let rmse = de.load_double("RMSEVal")?;
            let case = RunCase::load_from(de)?;
            result.results.push((rmse, case));
        }
        result.gof = de.load_double("GOF")?;

        let cdf_size = de.load_ullong("CDFSetSize")?;
        for _ in 0..cdf_size {
            result.cdf.push(de.load_double_vec("ObsCDF")?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::{Locator, Observable};
    use crate::parameter::{PdfShape, ScalarVarParameter, SimpleRange};

    fn space() -> ParameterSpace {
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
        space
    }

    fn observables(reference: Option<(f64, f64)>) -> ObservableSpace {
        let mut obs = ObservableSpace::new();
        let mut observable = Observable::new(
            "Temp@2000m",
            "Temperature",
            0.0,
            Locator::PointXyz {
                x: 0.0,
                y: 0.0,
                z: 2000.0,
            },
        );
        if let Some((value, std_dev)) = reference {
            observable.set_reference(vec![value], vec![std_dev]).unwrap();
        }
        obs.add(observable).unwrap();
        obs
    }

    // proxy trained on y = 10 + 3 a, exact for a first-order fit
    fn fitted_proxy(space: &ParameterSpace) -> RsProxy {
        let cases: Vec<RunCase> = [0.0, 5.0, 10.0]
            .iter()
            .enumerate()
            .map(|(id, &a)| {
                let mut case = RunCase::new(id, space.bind_parameters(&[a]).unwrap());
                case.set_observables(vec![ObsValue::new(vec![10.0 + 3.0 * a])]);
                case
            })
            .collect();
        let refs: Vec<&RunCase> = cases.iter().collect();
        let mut proxy = RsProxy::new("mc", 1, KrigingKind::None, 0.95).unwrap();
        proxy.calculate(&refs, space).unwrap();
        proxy
    }

    #[test]
    fn iterate_counts_down_and_collect_is_partial_safe() {
        let space = space();
        let proxy = fitted_proxy(&space);
        let obs = observables(None);

        let mut solver = McSolver::new(
            McAlgorithm::MonteCarlo,
            McKriging::None,
            PriorKind::None,
            MeasurementKind::None,
        );
        solver
            .prepare_simulation(&proxy, &space, None, &obs, 20, 5, 1.0)
            .unwrap();

        assert_eq!(solver.iterate_once(&proxy, &space).unwrap(), 4);
        assert_eq!(solver.iterate_once(&proxy, &space).unwrap(), 3);

        // stopping early and collecting partial results is legal
        solver.collect_results(&proxy, &space).unwrap();
        assert_eq!(solver.results().len(), 20);
        for (_, case) in solver.results() {
            assert_eq!(case.status(), RunStatus::Completed);
            let a = case.flattened_parameters()[0];
            assert!((0.0..=10.0).contains(&a));
        }
    }

    #[test]
    fn results_are_sorted_by_rmse() {
        let space = space();
        let proxy = fitted_proxy(&space);
        // reference 25 = 10 + 3*5, best match at a = 5
        let obs = observables(Some((25.0, 1.0)));

        let mut solver = McSolver::new(
            McAlgorithm::Mcmc,
            McKriging::None,
            PriorKind::Marginal,
            MeasurementKind::Normal,
        );
        solver
            .run_simulation(&proxy, &space, None, &obs, 50, 20, 1.0)
            .unwrap();

        let rmses: Vec<f64> = solver.results().iter().map(|(rmse, _)| *rmse).collect();
        for pair in rmses.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        // the chain concentrates near the posterior mode
        let best = solver.results().first().unwrap();
        let a = best.1.flattened_parameters()[0];
        assert!((a - 5.0).abs() < 1.5, "best match at a = {a}");
        assert!(solver.gof() > 0.0);
    }

    #[test]
    fn cdf_has_nine_deciles_per_component() {
        let space = space();
        let proxy = fitted_proxy(&space);
        let obs = observables(None);

        let mut solver = McSolver::new(
            McAlgorithm::MonteCarlo,
            McKriging::None,
            PriorKind::None,
            MeasurementKind::None,
        );
        solver
            .run_simulation(&proxy, &space, None, &obs, 40, 10, 1.0)
            .unwrap();

        assert_eq!(solver.cdf().len(), 1);
        let deciles = &solver.cdf()[0];
        assert_eq!(deciles.len(), 9);
        for pair in deciles.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn mcmc_without_references_is_rejected() {
        let space = space();
        let proxy = fitted_proxy(&space);
        let obs = observables(None);

        let mut solver = McSolver::new(
            McAlgorithm::Mcmc,
            McKriging::None,
            PriorKind::None,
            MeasurementKind::Normal,
        );
        let err = solver
            .prepare_simulation(&proxy, &space, None, &obs, 10, 5, 1.0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MonteCarloSolverError);
    }

    #[test]
    fn local_solver_improves_monotonically() {
        let space = space();
        let proxy = fitted_proxy(&space);
        let obs = observables(Some((25.0, 0.5)));

        let mut solver = McSolver::new(
            McAlgorithm::McLocalSolver,
            McKriging::None,
            PriorKind::None,
            MeasurementKind::Normal,
        );
        solver
            .run_simulation(&proxy, &space, None, &obs, 10, 50, 1.0)
            .unwrap();

        // survival of the fittest drives every point towards the optimum
        let (best_rmse, _) = solver.results().first().unwrap();
        assert!(*best_rmse < 1.0, "best rmse {best_rmse}");
    }

    #[test]
    fn iterating_unprepared_solver_fails() {
        let space = space();
        let proxy = fitted_proxy(&space);
        let mut solver = McSolver::new(
            McAlgorithm::MonteCarlo,
            McKriging::None,
            PriorKind::None,
            MeasurementKind::None,
        );
        let err = solver.iterate_once(&proxy, &space).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MonteCarloSolverError);
    }
}
