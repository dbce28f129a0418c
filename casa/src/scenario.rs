//! The scenario: top-level owner of one uncertainty-analysis workflow.
//!
//! A [`Scenario`] holds the base-case deck, the parameter and observable
//! spaces, the design generator, the generated and sampled case sets, the
//! run manager, the proxy set and the Monte-Carlo solver, and is the only
//! place the whole graph is created and freed. It serializes in full, in
//! either state format, with a versioned header.

use super::case::{RunCase, RunCaseSet};
use super::digger::DataDigger;
use super::doe::{DoeAlgorithm, DoeGenerator};
use super::error::{Error, ErrorKind, Result};
use super::mc::{McAlgorithm, McKriging, McSolver, MeasurementKind, PriorKind};
use super::mutate;
use super::parameter::{default_parameter_factory, ParameterFactory};
use super::project::Project;
use super::proxy::{KrigingKind, RsProxy, RsProxySet};
use super::quality::ProxyQuality;
use super::runner::{JobScheduler, LocalScheduler, RunManager};
use super::sensitivity::{ParetoSensitivity, SensitivityCalculator, TornadoSensitivity};
use super::serial::{Deserializer, Serializer, StateFormat};
use super::space::{ObservableSpace, ParameterSpace};
use std::path::{Path, PathBuf};

/// Version of the scenario state layout.
///
/// History: version 1 is the initial layout.
pub const SCENARIO_STATE_VERSION: u32 = 1;

/// One complete scenario analysis.
pub struct Scenario {
    id: String,
    location: PathBuf,
    iteration: usize,
    base_path: Option<PathBuf>,
    base_project: Option<Project>,
    parameter_space: ParameterSpace,
    observable_space: ObservableSpace,
    doe: DoeGenerator,
    doe_cases: RunCaseSet,
    mc_cases: RunCaseSet,
    run_manager: RunManager,
    proxies: RsProxySet,
    mc_solver: McSolver,
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario {
    /// Creates an empty scenario with the default Tornado design and plain
    /// Monte-Carlo sampling, running on the local scheduler back-end.
    #[must_use]
    pub fn new() -> Self {
        Self::with_scheduler(Box::new(LocalScheduler::new()))
    }

    /// Creates an empty scenario over a custom scheduler back-end.
    #[must_use]
    pub fn with_scheduler(scheduler: Box<dyn JobScheduler>) -> Self {
        Self {
            id: String::new(),
            location: PathBuf::from("."),
            iteration: 0,
            base_path: None,
            base_project: None,
            parameter_space: ParameterSpace::new(),
            observable_space: ObservableSpace::new(),
            doe: DoeGenerator::new(DoeAlgorithm::Tornado),
            doe_cases: RunCaseSet::new(),
            mc_cases: RunCaseSet::new(),
            run_manager: RunManager::new(scheduler),
            proxies: RsProxySet::new(),
            mc_solver: McSolver::new(
                McAlgorithm::MonteCarlo,
                McKriging::None,
                PriorKind::None,
                MeasurementKind::Normal,
            ),
        }
    }

    /// Sets the scenario identifier.
    pub fn set_scenario_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Scenario identifier.
    #[must_use]
    pub fn scenario_id(&self) -> &str {
        &self.id
    }

    /// Loads the base-case deck from a file.
    pub fn define_base_case(&mut self, project_path: &Path) -> Result<()> {
        let project = Project::load(project_path)?;
        self.base_project = Some(project);
        self.base_path = Some(project_path.to_path_buf());
        Ok(())
    }

    /// Base-case deck, if defined. Immutable after definition: mutation
    /// always works on a per-case deep copy.
    #[must_use]
    pub const fn base_case(&self) -> Option<&Project> {
        self.base_project.as_ref()
    }

    /// File the base-case deck was loaded from.
    #[must_use]
    pub fn base_case_project_file(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    /// A run case bound to the base values of every parameter.
    pub fn base_case_run_case(&self) -> Result<RunCase> {
        let base = self.parameter_space.base_as_doubles();
        Ok(RunCase::new(0, self.parameter_space.bind_parameters(&base)?))
    }

    /// Sets the folder the scenario generates its cases under, creating it
    /// when needed.
    pub fn set_scenario_location(&mut self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|err| {
            Error::new(
                ErrorKind::WrongPath,
                format!("can not create scenario location '{}': {err}", path.display()),
            )
        })?;
        self.location = path.to_path_buf();
        Ok(())
    }

    /// Points the scenario at an existing generated-cases folder.
    pub fn restore_scenario_location(&mut self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(Error::new(
                ErrorKind::WrongPath,
                format!("'{}' is not an existing folder", path.display()),
            ));
        }
        self.location = path.to_path_buf();
        Ok(())
    }

    /// Folder the generated cases live under.
    #[must_use]
    pub fn scenario_location(&self) -> &Path {
        &self.location
    }

    /// The variable-parameters manager.
    #[must_use]
    pub const fn parameter_space(&self) -> &ParameterSpace {
        &self.parameter_space
    }

    /// Mutable variable-parameters manager; build it before the first
    /// design generation.
    pub fn parameter_space_mut(&mut self) -> &mut ParameterSpace {
        &mut self.parameter_space
    }

    /// The observables manager.
    #[must_use]
    pub const fn observable_space(&self) -> &ObservableSpace {
        &self.observable_space
    }

    /// Mutable observables manager.
    pub fn observable_space_mut(&mut self) -> &mut ObservableSpace {
        &mut self.observable_space
    }

    /// Selects the design algorithm used by [`Self::generate_doe`].
    pub fn set_doe_algorithm(&mut self, algorithm: DoeAlgorithm) {
        self.doe = DoeGenerator::new(algorithm);
    }

    /// The configured design generator.
    #[must_use]
    pub const fn doe_generator(&self) -> &DoeGenerator {
        &self.doe
    }

    /// Generates a design into the scenario's DoE case set.
    pub fn generate_doe(&mut self, runs_hint: usize, label: &str) -> Result<()> {
        self.doe
            .generate(&self.parameter_space, &mut self.doe_cases, runs_hint, label)
    }

    /// Cases generated by designs.
    #[must_use]
    pub const fn doe_case_set(&self) -> &RunCaseSet {
        &self.doe_cases
    }

    /// Mutable design case set.
    pub fn doe_case_set_mut(&mut self) -> &mut RunCaseSet {
        &mut self.doe_cases
    }

    /// Cases materialised from Monte-Carlo sampling points.
    #[must_use]
    pub const fn mc_case_set(&self) -> &RunCaseSet {
        &self.mc_cases
    }

    /// Current scenario iteration; each mutation pass advances it so case
    /// folders never collide.
    #[must_use]
    pub const fn scenario_iteration(&self) -> usize {
        self.iteration
    }

    /// Mutates every fresh case into a deck under a new
    /// `Iteration_<k>` folder and injects the data-mining requests.
    pub fn apply_mutations(&mut self) -> Result<()> {
        let base = self.base_project.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::UndefinedValue, "base case was not defined")
        })?;
        self.iteration += 1;
        mutate::apply_mutations(
            base,
            &self.parameter_space,
            &mut self.doe_cases,
            &self.location,
            self.iteration,
        )?;
        DataDigger::request_observables(&self.observable_space, &mut self.doe_cases)
    }

    /// Re-validates the generated decks against their case parameters.
    pub fn validate_case_set(&mut self) -> Result<()> {
        mutate::validate_case_set(&self.parameter_space, &mut self.doe_cases)
    }

    /// The job manager.
    #[must_use]
    pub const fn run_manager(&self) -> &RunManager {
        &self.run_manager
    }

    /// Mutable job manager, e.g. for pipeline definition.
    pub fn run_manager_mut(&mut self) -> &mut RunManager {
        &mut self.run_manager
    }

    /// Runs the pipeline over all scheduled design cases.
    pub fn run_scheduled_cases(&mut self, async_run: bool) -> Result<()> {
        self.run_manager
            .run_scheduled_cases(&mut self.doe_cases, async_run)
    }

    /// Clears job state; the pipeline survives when `keep_apps` is set.
    pub fn reset_run_manager(&mut self, keep_apps: bool) {
        self.run_manager.reset(keep_apps);
    }

    /// Harvests the observables of every completed design case.
    pub fn collect_observables(&mut self) -> Result<()> {
        DataDigger::collect_run_results(&self.observable_space, &mut self.doe_cases)
    }

    /// Adds a named response surface and, when `doe_list` is not empty,
    /// fits it right away on the completed cases of those experiments.
    pub fn add_rs_algorithm(
        &mut self,
        name: &str,
        order: i32,
        kriging: KrigingKind,
        doe_list: &[String],
        target_r2: f64,
    ) -> Result<()> {
        let mut proxy = RsProxy::new(name, order, kriging, target_r2)?;
        if !doe_list.is_empty() {
            let cases = self.doe_cases.completed_cases(doe_list);
            proxy.calculate(&cases, &self.parameter_space)?;
        }
        self.proxies.add(proxy)
    }

    /// The response-surface set.
    #[must_use]
    pub const fn rs_proxy_set(&self) -> &RsProxySet {
        &self.proxies
    }

    /// Mutable response-surface set.
    pub fn rs_proxy_set_mut(&mut self) -> &mut RsProxySet {
        &mut self.proxies
    }

    /// R² and adjusted R² of a named proxy over the completed cases of the
    /// given experiments (all experiments when empty).
    pub fn proxy_quality_r2(
        &self,
        proxy_name: &str,
        doe_list: &[String],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let proxy = self.proxies.get(proxy_name).ok_or_else(|| {
            Error::new(
                ErrorKind::NonexistingId,
                format!("unknown proxy name: {proxy_name}"),
            )
        })?;
        let cases = self.doe_cases.completed_cases(doe_list);
        ProxyQuality::r2(proxy, &cases, &self.parameter_space)
    }

    /// Leave-one-out Q² of a named proxy configuration over the completed
    /// cases of the given experiments.
    pub fn proxy_quality_q2(&self, proxy_name: &str, doe_list: &[String]) -> Result<Vec<f64>> {
        let proxy = self.proxies.get(proxy_name).ok_or_else(|| {
            Error::new(
                ErrorKind::NonexistingId,
                format!("unknown proxy name: {proxy_name}"),
            )
        })?;
        let cases = self.doe_cases.completed_cases(doe_list);
        ProxyQuality::q2(
            proxy.polynomial_order(),
            proxy.kriging(),
            &cases,
            &self.parameter_space,
        )
    }

    /// Configures the Monte-Carlo solver.
    pub fn set_mc_algorithm(
        &mut self,
        algorithm: McAlgorithm,
        kriging: McKriging,
        prior: PriorKind,
        measurement: MeasurementKind,
    ) {
        self.mc_solver = McSolver::new(algorithm, kriging, prior, measurement);
    }

    /// The Monte-Carlo solver.
    #[must_use]
    pub const fn mc_solver(&self) -> &McSolver {
        &self.mc_solver
    }

    /// Mutable Monte-Carlo solver for stepwise driving.
    pub fn mc_solver_mut(&mut self) -> &mut McSolver {
        &mut self.mc_solver
    }

    /// Runs the configured sampler on a named proxy and materialises the
    /// sampling points into the MC case set under `label`.
    pub fn run_mc(
        &mut self,
        proxy_name: &str,
        label: &str,
        num_samples: usize,
        max_steps: usize,
        std_dev_factor: f64,
    ) -> Result<()> {
        let proxy = self.proxies.get(proxy_name).ok_or_else(|| {
            Error::new(
                ErrorKind::NonexistingId,
                format!("unknown proxy name: {proxy_name}"),
            )
        })?;
        self.mc_solver.run_simulation(
            proxy,
            &self.parameter_space,
            None,
            &self.observable_space,
            num_samples,
            max_steps,
            std_dev_factor,
        )?;

        let cases: Vec<RunCase> = self
            .mc_solver
            .results()
            .iter()
            .map(|(_, case)| case.clone())
            .collect();
        self.mc_cases.extend_experiment(cases, label);
        Ok(())
    }

    /// Exports the deck of one Monte-Carlo sample (0 is the best match) as
    /// a calibrated project under the scenario location.
    pub fn save_calibrated_case(&self, file_name: &str, sample: usize) -> Result<PathBuf> {
        let base = self.base_project.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::UndefinedValue, "base case was not defined")
        })?;
        let (_, case) = self.mc_solver.results().get(sample).ok_or_else(|| {
            Error::new(
                ErrorKind::NonexistingId,
                format!("no Monte-Carlo sample {sample}"),
            )
        })?;

        let target_dir = self.location.join("Calibrated");
        let mut deck = base.clone();
        for (parameter, definition) in case.parameters().iter().zip(self.parameter_space.iter()) {
            parameter.set_in_project(definition, &mut deck, case.id(), &target_dir)?;
        }
        let path = target_dir.join(file_name);
        deck.save(&path)?;
        Ok(path)
    }

    /// Tornado sensitivities over the given experiments.
    pub fn calculate_tornado(&self, doe_list: &[String]) -> Result<Vec<TornadoSensitivity>> {
        SensitivityCalculator::calculate_tornado(
            &self.doe_cases,
            doe_list,
            &self.parameter_space,
            &self.observable_space,
        )
    }

    /// Pareto ranking from a named proxy.
    pub fn calculate_pareto(&self, proxy_name: &str) -> Result<ParetoSensitivity> {
        let proxy = self.proxies.get(proxy_name).ok_or_else(|| {
            Error::new(
                ErrorKind::NonexistingId,
                format!("unknown proxy name: {proxy_name}"),
            )
        })?;
        SensitivityCalculator::calculate_pareto(
            proxy,
            &self.parameter_space,
            &self.observable_space,
        )
    }

    /// State-layout version written by [`Self::save_scenario`].
    #[must_use]
    pub const fn version(&self) -> u32 {
        SCENARIO_STATE_VERSION
    }

    /// Saves the full scenario state to a file in the given format.
    pub fn save_scenario(&self, path: &Path, format: StateFormat) -> Result<()> {
        let mut ser = Serializer::to_file(path, format, SCENARIO_STATE_VERSION)?;
        ser.begin_object("Scenario", "ScenarioAnalysis", SCENARIO_STATE_VERSION)?;
        ser.save_string(&self.id, "ScenarioID")?;
        ser.save_string(&self.location.to_string_lossy(), "Location")?;
        ser.save_ullong(self.iteration as u64, "Iteration")?;
        ser.save_bool(self.base_path.is_some(), "HasBaseCase")?;
        if let Some(base_path) = &self.base_path {
            ser.save_string(&base_path.to_string_lossy(), "BaseCasePath")?;
        }
        ser.save_string(&self.doe.algorithm().to_string(), "DoEAlgo")?;

        self.parameter_space.save_to(&mut ser)?;
        self.observable_space.save_to(&mut ser)?;
        self.doe_cases.save_to(&mut ser)?;
        self.mc_cases.save_to(&mut ser)?;

        ser.save_ullong(self.run_manager.applications().len() as u64, "AppsNum")?;
        for app in self.run_manager.applications() {
            app.save_to(&mut ser)?;
        }

        ser.save_ullong(self.proxies.len() as u64, "ProxiesNum")?;
        for proxy in self.proxies.iter() {
            proxy.save_to(&mut ser)?;
        }

        self.mc_solver.save_to(&mut ser)?;
        ser.finish()
    }

    /// Loads a scenario saved by [`Self::save_scenario`], dispatching the
    /// parameter variants through the default factory table.
    pub fn load_scenario(path: &Path) -> Result<Self> {
        Self::load_scenario_with(path, &default_parameter_factory(), Box::new(LocalScheduler::new()))
    }

    /// Loads a scenario with an explicit parameter factory table and
    /// scheduler back-end.
    pub fn load_scenario_with(
        path: &Path,
        factory: &ParameterFactory,
        scheduler: Box<dyn JobScheduler>,
    ) -> Result<Self> {
        let mut de = Deserializer::from_file(path, SCENARIO_STATE_VERSION)?;
        de.load_object_header("Scenario", "ScenarioAnalysis", SCENARIO_STATE_VERSION)?;

        let mut result = Self::with_scheduler(scheduler);
        result.id = de.load_string("ScenarioID")?;
        result.location = PathBuf::from(de.load_string("Location")?);
        result.iteration = de.load_ullong("Iteration")? as usize;
        if de.load_bool("HasBaseCase")? {
            let base_path = PathBuf::from(de.load_string("BaseCasePath")?);
            // a moved state file may legally point at a vanished base deck
            match Project::load(&base_path) {
                Ok(project) => result.base_project = Some(project),
                Err(err) => log::warn!(
                    "base case '{}' not reloaded: {err}",
                    base_path.display()
                ),
            }
            result.base_path = Some(base_path);
        }
        let algorithm: DoeAlgorithm = de
            .load_string("DoEAlgo")?
            .parse()
            .map_err(|err: super::doe::UnknownDoeAlgorithm| {
                Error::new(ErrorKind::DeserializationError, err.to_string())
            })?;
        result.doe = DoeGenerator::new(algorithm);

        result.parameter_space = ParameterSpace::load_from(&mut de, factory)?;
        result.observable_space = ObservableSpace::load_from(&mut de)?;
        result.doe_cases = RunCaseSet::load_from(&mut de)?;
        result.mc_cases = RunCaseSet::load_from(&mut de)?;

        let apps = de.load_ullong("AppsNum")?;
        for _ in 0..apps {
            result
                .run_manager
                .add_application(super::app::SimApp::load_from(&mut de)?);
        }

        let proxies = de.load_ullong("ProxiesNum")?;
        for _ in 0..proxies {
            result.proxies.add(RsProxy::load_from(&mut de)?)?;
        }

        result.mc_solver = McSolver::load_from(&mut de)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::RunStatus;
    use crate::digger::{DATA_MINING_TABLE, UNDEFINED_VALUE};
    use crate::observable::{Locator, Observable};
    use crate::parameter::{PdfShape, ScalarVarParameter, SimpleRange};
    use crate::project::Value;
    use float_cmp::assert_approx_eq;

    fn build_scenario(root: &Path) -> Scenario {
        let mut scenario = Scenario::new();
        scenario.set_scenario_id("TwoParameterStudy");
        scenario.set_scenario_location(&root.join("cases")).unwrap();

        let mut base = Project::new();
        base.set_value("TblA", 0, "ColA", Value::Float(25.0));
        base.set_value("TblB", 0, "ColB", Value::Float(2.05));
        let base_path = root.join("base_project.yaml");
        base.save(&base_path).unwrap();
        scenario.define_base_case(&base_path).unwrap();

        scenario
            .parameter_space_mut()
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
        scenario
            .parameter_space_mut()
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
        observable.set_reference(vec![152.05], vec![5.0]).unwrap();
        scenario.observable_space_mut().add(observable).unwrap();
        scenario
    }

    // stand-in for the simulator: answer the data-mining requests of every
    // scheduled case and complete it
    fn simulate(scenario: &mut Scenario) {
        let indices: Vec<usize> = (0..scenario.doe_case_set().len()).collect();
        for i in indices {
            let case = scenario.doe_case_set_mut().get_mut(i).unwrap();
            if case.status() != RunStatus::Scheduled {
                continue;
            }
            let values = case.flattened_parameters();
            let answer = 50.0 + 4.0 * values[0] + values[1];
            let deck_path = case.project_path().unwrap().to_path_buf();

            let mut deck = Project::load(&deck_path).unwrap();
            let table = deck.table_mut(DATA_MINING_TABLE);
            for row in table.iter_mut() {
                if row.get("Value") == Some(&Value::Float(UNDEFINED_VALUE)) {
                    row.insert("Value".to_owned(), Value::Float(answer));
                }
            }
            deck.save(&deck_path).unwrap();

            case.set_status(RunStatus::Running).unwrap();
            case.set_status(RunStatus::Completed).unwrap();
        }
    }

    fn run_workflow(scenario: &mut Scenario) {
        scenario.set_doe_algorithm(DoeAlgorithm::Tornado);
        scenario.generate_doe(0, "Tornado").unwrap();
        scenario.apply_mutations().unwrap();
        scenario.validate_case_set().unwrap();
        simulate(scenario);
        scenario.collect_observables().unwrap();
        scenario
            .add_rs_algorithm(
                "FirstOrderGK",
                1,
                KrigingKind::Global,
                &["Tornado".to_owned()],
                0.95,
            )
            .unwrap();
    }

    #[test]
    fn end_to_end_tornado_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let mut scenario = build_scenario(dir.path());
        run_workflow(&mut scenario);

        // every case carries the full parameter vector and its observables
        for case in scenario.doe_case_set().iter() {
            assert_eq!(case.parameters().len(), scenario.parameter_space().len());
            assert_eq!(case.status(), RunStatus::Completed);
            assert_eq!(
                case.observables().len(),
                scenario.observable_space().len()
            );
        }

        // proxy interpolates the base case exactly under global kriging
        let mut probe = scenario.base_case_run_case().unwrap();
        let proxy = scenario.rs_proxy_set().get("FirstOrderGK").unwrap();
        proxy.evaluate(&mut probe, scenario.parameter_space()).unwrap();
        let base_observable = scenario
            .doe_case_set()
            .get(0)
            .unwrap()
            .obs_value(0)
            .unwrap()
            .values()[0];
        assert_approx_eq!(
            f64,
            probe.obs_value(0).unwrap().values()[0],
            base_observable,
            epsilon = 1e-6
        );

        let (r2, _) = scenario
            .proxy_quality_r2("FirstOrderGK", &["Tornado".to_owned()])
            .unwrap();
        assert!(r2[0] > 0.999);

        let tornado = scenario.calculate_tornado(&["Tornado".to_owned()]).unwrap();
        assert_eq!(tornado.len(), 1);
        let pareto = scenario.calculate_pareto("FirstOrderGK").unwrap();
        assert_eq!(pareto.parameter_names[0], "A");
    }

    #[test]
    fn mc_results_land_in_the_mc_case_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut scenario = build_scenario(dir.path());
        run_workflow(&mut scenario);

        scenario.set_mc_algorithm(
            McAlgorithm::Mcmc,
            McKriging::Global,
            PriorKind::Marginal,
            MeasurementKind::Normal,
        );
        scenario.run_mc("FirstOrderGK", "MC", 30, 10, 1.0).unwrap();

        assert_eq!(scenario.mc_case_set().len(), 30);
        assert_eq!(scenario.mc_case_set().experiment_names(), vec!["MC"]);
        assert!(scenario.mc_solver().gof() > 0.0);

        let calibrated = scenario.save_calibrated_case("calibrated.yaml", 0).unwrap();
        let deck = Project::load(&calibrated).unwrap();
        let best = &scenario.mc_solver().results()[0].1;
        assert_approx_eq!(
            f64,
            deck.value("TblA", 0, "ColA").unwrap().as_float().unwrap(),
            best.flattened_parameters()[0],
            epsilon = 1e-6
        );
    }

    #[test]
    fn scenario_round_trips_through_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut scenario = build_scenario(dir.path());
        run_workflow(&mut scenario);
        scenario.run_mc("FirstOrderGK", "MC", 10, 5, 1.0).unwrap();

        for (format, file) in [
            (StateFormat::Text, "state.txt"),
            (StateFormat::Binary, "state.bin"),
        ] {
            let state_path = dir.path().join(file);
            scenario.save_scenario(&state_path, format).unwrap();
            let loaded = Scenario::load_scenario(&state_path).unwrap();

            assert_eq!(loaded.scenario_id(), scenario.scenario_id());
            assert_eq!(loaded.scenario_iteration(), scenario.scenario_iteration());
            assert_eq!(loaded.parameter_space(), scenario.parameter_space());
            assert_eq!(loaded.observable_space(), scenario.observable_space());
            assert_eq!(
                loaded.doe_case_set().len(),
                scenario.doe_case_set().len()
            );
            for (a, b) in loaded
                .doe_case_set()
                .iter()
                .zip(scenario.doe_case_set().iter())
            {
                assert_eq!(a, b);
            }
            assert_eq!(loaded.mc_case_set().len(), scenario.mc_case_set().len());
            assert_eq!(
                loaded.rs_proxy_set().get("FirstOrderGK"),
                scenario.rs_proxy_set().get("FirstOrderGK")
            );
            assert_approx_eq!(f64, loaded.mc_solver().gof(), scenario.mc_solver().gof(), ulps = 2);
            assert_eq!(loaded.base_case(), scenario.base_case());
        }
    }

    #[test]
    fn text_state_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let mut scenario = build_scenario(dir.path());
        run_workflow(&mut scenario);

        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        scenario.save_scenario(&first, StateFormat::Text).unwrap();
        scenario.save_scenario(&second, StateFormat::Text).unwrap();
        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );
    }

    #[test]
    fn generated_values_stay_inside_their_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let mut scenario = build_scenario(dir.path());

        for (algorithm, label, hint) in [
            (DoeAlgorithm::Tornado, "t", 0),
            (DoeAlgorithm::BoxBehnken, "bb", 0),
            (DoeAlgorithm::PlackettBurman, "pb", 0),
            (DoeAlgorithm::PlackettBurmanMirror, "pbm", 0),
            (DoeAlgorithm::FullFactorial, "ff", 0),
            (DoeAlgorithm::LatinHypercube, "lhc", 8),
            (DoeAlgorithm::SpaceFilling, "sf", 6),
        ] {
            scenario.set_doe_algorithm(algorithm);
            scenario.generate_doe(hint, label).unwrap();
            for case in scenario.doe_case_set().iter_experiment(label) {
                let values = case.flattened_parameters();
                assert!((10.0..=40.0).contains(&values[0]), "{algorithm}: {values:?}");
                assert!((0.1..=4.0).contains(&values[1]), "{algorithm}: {values:?}");
            }
        }
    }

    #[test]
    fn unknown_proxy_name_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = build_scenario(dir.path());
        let err = scenario.proxy_quality_r2("nope", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NonexistingId);
    }
}
