//! Run cases and their experiment-tagged collections.
//!
//! A [`RunCase`] is one point of the experiment: a full parameter vector in
//! parameter-space order, the realized observables once the simulator
//! finished, the run status and the generated deck location. A
//! [`RunCaseSet`] keeps cases grouped under experiment names and supports
//! filtered views without copying.

use super::error::{Error, ErrorKind, Result};
use super::observable::ObsValue;
use super::parameter::Parameter;
use super::serial::{Deserializer, Serializer};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Lifecycle state of a run case.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunStatus {
    /// Created but not handed to the run manager.
    NotSubmitted,
    /// Deck written, waiting for submission.
    Scheduled,
    /// At least one pipeline stage is executing.
    Running,
    /// Every pipeline stage exited zero.
    Completed,
    /// Mutation, validation or a pipeline stage failed.
    Failed,
}

impl RunStatus {
    const fn rank(self) -> u8 {
        match self {
            Self::NotSubmitted => 0,
            Self::Scheduled => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    const fn to_u32(self) -> u32 {
        match self {
            Self::NotSubmitted => 0,
            Self::Scheduled => 1,
            Self::Running => 2,
            Self::Completed => 3,
            Self::Failed => 4,
        }
    }

    fn from_u32(val: u32) -> Result<Self> {
        match val {
            0 => Ok(Self::NotSubmitted),
            1 => Ok(Self::Scheduled),
            2 => Ok(Self::Running),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Failed),
            _ => Err(Error::new(
                ErrorKind::DeserializationError,
                format!("unknown run status id {val}"),
            )),
        }
    }
}

/// One parameter vector paired with its deck and, after completion, its
/// observable values.
#[derive(Clone, Debug, PartialEq)]
pub struct RunCase {
    id: usize,
    parameters: Vec<Parameter>,
    observables: Vec<ObsValue>,
    status: RunStatus,
    project_path: Option<PathBuf>,
    diagnostic: Option<String>,
}

impl RunCase {
    /// Creates a case from its bound parameters, in parameter-space order.
    #[must_use]
    pub const fn new(id: usize, parameters: Vec<Parameter>) -> Self {
        Self {
            id,
            parameters,
            observables: Vec::new(),
            status: RunStatus::NotSubmitted,
            project_path: None,
            diagnostic: None,
        }
    }

    /// Case identifier, unique inside its [`RunCaseSet`].
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    /// Bound parameters in parameter-space order.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Parameter at position `i`.
    #[must_use]
    pub fn parameter(&self, i: usize) -> Option<&Parameter> {
        self.parameters.get(i)
    }

    /// Canonical flattening of the full parameter vector.
    #[must_use]
    pub fn flattened_parameters(&self) -> Vec<f64> {
        self.parameters
            .iter()
            .flat_map(Parameter::as_doubles)
            .collect()
    }

    /// Realized observables in observable-space order; empty until
    /// harvested.
    #[must_use]
    pub fn observables(&self) -> &[ObsValue] {
        &self.observables
    }

    /// Observable value at position `i`.
    #[must_use]
    pub fn obs_value(&self, i: usize) -> Option<&ObsValue> {
        self.observables.get(i)
    }

    /// Stores the realized observables.
    pub fn set_observables(&mut self, observables: Vec<ObsValue>) {
        self.observables = observables;
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Advances the lifecycle state; transitions are monotonic and terminal
    /// states can not be left except through [`Self::retry`].
    pub fn set_status(&mut self, status: RunStatus) -> Result<()> {
        let same_terminal = self.status.rank() == 3 && self.status != status;
        if status.rank() < self.status.rank() || same_terminal {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!(
                    "case {} can not go from {:?} to {status:?}",
                    self.id, self.status
                ),
            ));
        }
        self.status = status;
        Ok(())
    }

    /// Explicit retry reset: a failed case returns to `Scheduled`, keeping
    /// its deck but dropping the diagnostic.
    pub fn retry(&mut self) -> Result<()> {
        if self.status != RunStatus::Failed {
            return Err(Error::new(
                ErrorKind::OutOfRangeValue,
                format!("case {} is {:?}, only failed cases retry", self.id, self.status),
            ));
        }
        self.status = if self.project_path.is_some() {
            RunStatus::Scheduled
        } else {
            RunStatus::NotSubmitted
        };
        self.diagnostic = None;
        Ok(())
    }

    /// Location of the generated deck, if mutation succeeded.
    #[must_use]
    pub fn project_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }

    /// Records the generated deck location.
    pub fn set_project_path(&mut self, path: PathBuf) {
        self.project_path = Some(path);
    }

    /// Per-case diagnostic accumulated by mutation or validation.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// Stores a per-case diagnostic.
    pub fn set_diagnostic(&mut self, diagnostic: impl Into<String>) {
        self.diagnostic = Some(diagnostic.into());
    }

    /// Writes the case as one named, versioned object group.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.begin_object("RunCase", "Case", 0)?;
        ser.save_ullong(self.id as u64, "ID")?;
        ser.save_uint(self.status.to_u32(), "Status")?;
        ser.save_bool(self.project_path.is_some(), "HasPath")?;
        if let Some(path) = &self.project_path {
            ser.save_string(&path.to_string_lossy(), "Path")?;
        }
        ser.save_bool(self.diagnostic.is_some(), "HasDiag")?;
        if let Some(diagnostic) = &self.diagnostic {
            ser.save_string(diagnostic, "Diag")?;
        }
        ser.save_ullong(self.parameters.len() as u64, "PrmsNum")?;
        for parameter in &self.parameters {
            parameter.save_to(ser)?;
        }
        ser.save_ullong(self.observables.len() as u64, "ObsNum")?;
        for observable in &self.observables {
            observable.save_to(ser)?;
        }
        Ok(())
    }

    /// Reads a case written by [`Self::save_to`].
    pub fn load_from(de: &mut Deserializer) -> Result<Self> {
        de.load_object_header("RunCase", "Case", 0)?;
        let id = de.load_ullong("ID")? as usize;
        let status = RunStatus::from_u32(de.load_uint("Status")?)?;
        let project_path = if de.load_bool("HasPath")? {
            Some(PathBuf::from(de.load_string("Path")?))
        } else {
            None
        };
        let diagnostic = if de.load_bool("HasDiag")? {
            Some(de.load_string("Diag")?)
        } else {
            None
        };
        let prm_count = de.load_ullong("PrmsNum")?;
        let mut parameters = Vec::with_capacity(prm_count as usize);
        for _ in 0..prm_count {
            parameters.push(Parameter::load_from(de)?);
        }
        let obs_count = de.load_ullong("ObsNum")?;
        let mut observables = Vec::with_capacity(obs_count as usize);
        for _ in 0..obs_count {
            observables.push(ObsValue::load_from(de)?);
        }
        Ok(Self {
            id,
            parameters,
            observables,
            status,
            project_path,
            diagnostic,
        })
    }
}

/// Ordered collection of run cases grouped by experiment name.
#[derive(Debug, Default)]
pub struct RunCaseSet {
    cases: Vec<RunCase>,
    experiment_order: Vec<String>,
    experiments: FxHashMap<String, Vec<usize>>,
}

impl RunCaseSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of cases across all experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Returns `true` when the set holds no cases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Case at global position `i`.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<&RunCase> {
        self.cases.get(i)
    }

    /// Mutable case at global position `i`.
    pub fn get_mut(&mut self, i: usize) -> Option<&mut RunCase> {
        self.cases.get_mut(i)
    }

    /// Iterator over all cases in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RunCase> {
        self.cases.iter()
    }

    /// Mutable iterator over all cases.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RunCase> {
        self.cases.iter_mut()
    }

    /// Experiment names in insertion order.
    #[must_use]
    pub fn experiment_names(&self) -> Vec<&str> {
        self.experiment_order.iter().map(String::as_str).collect()
    }

    /// Global indices of the cases of one experiment.
    #[must_use]
    pub fn experiment_indices(&self, label: &str) -> &[usize] {
        self.experiments.get(label).map_or(&[], Vec::as_slice)
    }

    /// Moves new cases into the set under a fresh experiment name.
    pub fn add_experiment(&mut self, cases: Vec<RunCase>, label: &str) -> Result<()> {
        if self.experiments.contains_key(label) {
            return Err(Error::new(
                ErrorKind::AlreadyDefined,
                format!("experiment '{label}' already exists in the case set"),
            ));
        }
        self.extend_experiment(cases, label);
        Ok(())
    }

    /// Moves new cases into the set, creating the experiment when absent and
    /// appending to it otherwise (the space-filling augmentation path).
    pub fn extend_experiment(&mut self, cases: Vec<RunCase>, label: &str) {
        let indices = match self.experiments.entry(label.to_owned()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                self.experiment_order.push(label.to_owned());
                entry.insert(Vec::new())
            }
        };
        for mut case in cases {
            case.set_id(self.cases.len());
            indices.push(self.cases.len());
            self.cases.push(case);
        }
    }

    /// Non-copying view over the cases of one experiment.
    pub fn iter_experiment<'a>(&'a self, label: &str) -> impl Iterator<Item = &'a RunCase> {
        self.experiment_indices(label)
            .iter()
            .map(|&i| &self.cases[i])
    }

    /// Completed cases of the given experiments, in global order; an empty
    /// label list selects every experiment.
    #[must_use]
    pub fn completed_cases(&self, labels: &[String]) -> Vec<&RunCase> {
        let mut indices: Vec<usize> = if labels.is_empty() {
            (0..self.cases.len()).collect()
        } else {
            let mut collected: Vec<usize> = labels
                .iter()
                .flat_map(|label| self.experiment_indices(label).iter().copied())
                .collect();
            collected.sort_unstable();
            collected.dedup();
            collected
        };
        indices.retain(|&i| self.cases[i].status() == RunStatus::Completed);
        indices.into_iter().map(|i| &self.cases[i]).collect()
    }

    /// Mutable access to the cases of one experiment.
    pub fn experiment_cases_mut(&mut self, label: &str) -> Vec<&mut RunCase> {
        let indices: Vec<usize> = self.experiment_indices(label).to_vec();
        let mut remaining: &mut [RunCase] = &mut self.cases;
        let mut offset = 0;
        let mut result = Vec::with_capacity(indices.len());
        // indices are strictly increasing by construction
        for index in indices {
            let (_, rest) = remaining.split_at_mut(index - offset);
            let (case, rest) = rest.split_first_mut().expect("index inside case set");
            result.push(case);
            remaining = rest;
            offset = index + 1;
        }
        result
    }

    /// Writes the set with per-experiment membership.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.begin_object("RunCaseSet", "CaseSet", 0)?;
        ser.save_ullong(self.cases.len() as u64, "CasesNum")?;
        for case in &self.cases {
            case.save_to(ser)?;
        }
        ser.save_string_vec(&self.experiment_order, "Experiments")?;
        for label in &self.experiment_order {
            let indices: Vec<u64> = self.experiments[label].iter().map(|&i| i as u64).collect();
            ser.save_ullong_vec(&indices, "ExpIndices")?;
        }
        Ok(())
    }

    /// Reads a set written by [`Self::save_to`].
    pub fn load_from(de: &mut Deserializer) -> Result<Self> {
        de.load_object_header("RunCaseSet", "CaseSet", 0)?;
        let count = de.load_ullong("CasesNum")?;
        let mut cases = Vec::with_capacity(count as usize);
        for _ in 0..count {
            cases.push(RunCase::load_from(de)?);
        }
        let experiment_order = de.load_string_vec("Experiments")?;
        let mut experiments = FxHashMap::default();
        for label in &experiment_order {
            let indices: Vec<usize> = de
                .load_ullong_vec("ExpIndices")?
                .into_iter()
                .map(|i| i as usize)
                .collect();
            experiments.insert(label.clone(), indices);
        }
        Ok(Self {
            cases,
            experiment_order,
            experiments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(val: f64) -> RunCase {
        RunCase::new(0, vec![Parameter::Scalar(val)])
    }

    #[test]
    fn status_transitions_are_monotonic() {
        let mut rc = case(1.0);
        rc.set_status(RunStatus::Scheduled).unwrap();
        rc.set_status(RunStatus::Running).unwrap();
        assert!(rc.set_status(RunStatus::Scheduled).is_err());
        rc.set_status(RunStatus::Completed).unwrap();
        assert!(rc.set_status(RunStatus::Failed).is_err());
    }

    #[test]
    fn retry_resets_only_failed_cases() {
        let mut rc = case(1.0);
        assert!(rc.retry().is_err());

        rc.set_status(RunStatus::Scheduled).unwrap();
        rc.set_project_path(PathBuf::from("Iteration_1/Case_1/project.yaml"));
        rc.set_status(RunStatus::Failed).unwrap();
        rc.set_diagnostic("stage exited 9");
        rc.retry().unwrap();
        assert_eq!(rc.status(), RunStatus::Scheduled);
        assert!(rc.diagnostic().is_none());
    }

    #[test]
    fn each_case_belongs_to_one_experiment() {
        let mut set = RunCaseSet::new();
        set.add_experiment(vec![case(1.0), case(2.0)], "Tornado").unwrap();
        set.add_experiment(vec![case(3.0)], "LHC_pass2").unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.experiment_names(), vec!["Tornado", "LHC_pass2"]);
        assert_eq!(set.experiment_indices("Tornado"), &[0, 1]);
        assert_eq!(set.experiment_indices("LHC_pass2"), &[2]);
        assert_eq!(set.iter_experiment("Tornado").count(), 2);

        let err = set.add_experiment(vec![case(4.0)], "Tornado").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyDefined);
    }

    #[test]
    fn space_filling_augmentation_appends() {
        let mut set = RunCaseSet::new();
        set.extend_experiment(vec![case(1.0)], "SpaceFilling");
        set.extend_experiment(vec![case(2.0)], "SpaceFilling");
        assert_eq!(set.experiment_indices("SpaceFilling"), &[0, 1]);
        assert_eq!(set.experiment_names().len(), 1);
    }

    #[test]
    fn completed_cases_filter_by_labels() {
        let mut set = RunCaseSet::new();
        set.add_experiment(vec![case(1.0), case(2.0)], "Tornado").unwrap();
        set.add_experiment(vec![case(3.0)], "MC").unwrap();

        for i in [0, 2] {
            let rc = set.get_mut(i).unwrap();
            rc.set_status(RunStatus::Scheduled).unwrap();
            rc.set_status(RunStatus::Running).unwrap();
            rc.set_status(RunStatus::Completed).unwrap();
        }

        assert_eq!(set.completed_cases(&[]).len(), 2);
        let tornado_only = set.completed_cases(&["Tornado".to_owned()]);
        assert_eq!(tornado_only.len(), 1);
        assert_eq!(tornado_only[0].id(), 0);
    }
}
