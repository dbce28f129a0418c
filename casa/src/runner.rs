//! Job dispatch over an external batch scheduler.
//!
//! The run manager is single-threaded cooperative: it keeps an in-memory
//! job table, submits scripts through an abstract scheduler back-end, polls
//! at a bounded rate and never blocks on a single job. Stages of one case
//! run strictly serially; different cases interleave freely.

use super::app::SimApp;
use super::case::{RunCaseSet, RunStatus};
use super::error::{Error, ErrorKind, Result};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Identifier of one submitted job.
pub type JobId = u64;

/// Scheduler-side state of one job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobState {
    /// Submitted, not yet running.
    Queued,
    /// Executing.
    Running,
    /// Exited zero.
    Succeeded,
    /// Exited non-zero or was killed.
    Failed,
}

/// Abstract batch scheduler with submit/status/kill.
///
/// Cluster mappings (LSF and friends) are pluggable back-ends implementing
/// this trait; they are not part of the core.
pub trait JobScheduler {
    /// Cluster name used in diagnostics.
    fn cluster_name(&self) -> &str;

    /// Submits a script and returns its job identifier.
    fn submit(&mut self, script: &Path, cpus: usize, job_name: &str) -> Result<JobId>;

    /// Polls the state of a job.
    fn status(&mut self, job: JobId) -> Result<JobState>;

    /// Best-effort kill of a job.
    fn kill(&mut self, job: JobId) -> Result<()>;
}

/// Scheduler back-end spawning jobs as local processes.
///
/// Good for single-host runs and for tests; cpu counts are accepted but not
/// enforced.
#[derive(Debug, Default)]
pub struct LocalScheduler {
    next_id: JobId,
    children: FxHashMap<JobId, Child>,
    finished: FxHashMap<JobId, JobState>,
}

impl LocalScheduler {
    /// Creates an empty local back-end.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobScheduler for LocalScheduler {
    fn cluster_name(&self) -> &str {
        "LOCAL"
    }

    fn submit(&mut self, script: &Path, _cpus: usize, _job_name: &str) -> Result<JobId> {
        let child = Command::new("sh")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                Error::new(
                    ErrorKind::RunManagerError,
                    format!("can not spawn '{}': {err}", script.display()),
                )
            })?;
        let id = self.next_id;
        self.next_id += 1;
        self.children.insert(id, child);
        Ok(id)
    }

    fn status(&mut self, job: JobId) -> Result<JobState> {
        if let Some(state) = self.finished.get(&job) {
            return Ok(*state);
        }
        let child = self.children.get_mut(&job).ok_or_else(|| {
            Error::new(ErrorKind::NonexistingId, format!("unknown job id {job}"))
        })?;
        match child.try_wait() {
            Ok(Some(exit)) => {
                let state = if exit.success() {
                    JobState::Succeeded
                } else {
                    JobState::Failed
                };
                self.children.remove(&job);
                self.finished.insert(job, state);
                Ok(state)
            }
            Ok(None) => Ok(JobState::Running),
            Err(err) => Err(Error::new(
                ErrorKind::RunManagerError,
                format!("can not poll job {job}: {err}"),
            )),
        }
    }

    fn kill(&mut self, job: JobId) -> Result<()> {
        if let Some(child) = self.children.get_mut(&job) {
            // the process may already have exited; that is fine
            let _ = child.kill();
        }
        Ok(())
    }
}

// progress of one case through the application pipeline
#[derive(Debug)]
struct CaseProgress {
    case_index: usize,
    stage: usize,
    job: Option<JobId>,
    finished: bool,
}

/// Drives the application pipeline over every scheduled case.
pub struct RunManager {
    apps: Vec<SimApp>,
    scheduler: Box<dyn JobScheduler>,
    progress: Vec<CaseProgress>,
    poll_interval: Duration,
    last_poll: Option<Instant>,
}

impl RunManager {
    /// Creates a run manager over the given scheduler back-end.
    #[must_use]
    pub fn new(scheduler: Box<dyn JobScheduler>) -> Self {
        Self {
            apps: Vec::new(),
            scheduler,
            progress: Vec::new(),
            poll_interval: Duration::from_millis(200),
            last_poll: None,
        }
    }

    /// Cluster name of the scheduler back-end.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        self.scheduler.cluster_name()
    }

    /// Appends an application to the pipeline.
    pub fn add_application(&mut self, app: SimApp) {
        self.apps.push(app);
    }

    /// The configured pipeline.
    #[must_use]
    pub fn applications(&self) -> &[SimApp] {
        &self.apps
    }

    /// Mutable access to the pipeline, e.g. for version overrides.
    pub fn applications_mut(&mut self) -> &mut Vec<SimApp> {
        &mut self.apps
    }

    /// Overrides the simulator version on every pipeline stage.
    pub fn set_simulator_version(&mut self, version: &str) {
        for app in &mut self.apps {
            app.set_version(version);
        }
    }

    /// Bounds the scheduler polling rate.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Discards job state; the pipeline definition survives when
    /// `keep_apps` is set. Used when resuming a saved scenario.
    pub fn reset(&mut self, keep_apps: bool) {
        self.progress.clear();
        self.last_poll = None;
        if !keep_apps {
            self.apps.clear();
        }
    }

    fn stage_script(case_deck: &Path, stage: usize, app: &SimApp) -> Result<PathBuf> {
        let dir = case_deck.parent().ok_or_else(|| {
            Error::new(
                ErrorKind::WrongPath,
                format!("case deck '{}' has no parent folder", case_deck.display()),
            )
        })?;
        let path = dir.join(format!("stage_{stage}_{}.sh", app.name()));
        std::fs::write(&path, app.generate_script(case_deck, case_deck))?;
        Ok(path)
    }

    fn submit_stage(&mut self, case_index: usize, stage: usize, deck: &Path) -> Result<JobId> {
        let app = &self.apps[stage];
        let script = Self::stage_script(deck, stage, app)?;
        self.scheduler.submit(
            &script,
            app.cpus(),
            &format!("case_{case_index}_stage_{stage}"),
        )
    }

    /// Submits every scheduled case and, unless `async_run` is set, polls
    /// until the whole batch finished.
    ///
    /// With `async_run` the call returns right after submission; the caller
    /// drives completion through [`Self::update`].
    pub fn run_scheduled_cases(&mut self, cases: &mut RunCaseSet, async_run: bool) -> Result<()> {
        if self.apps.is_empty() {
            return Err(Error::new(
                ErrorKind::RunManagerError,
                "no applications in the pipeline",
            ));
        }

        for case_index in 0..cases.len() {
            let case = cases.get(case_index).expect("index inside case set");
            if case.status() != RunStatus::Scheduled {
                continue;
            }
            if self.progress.iter().any(|p| p.case_index == case_index) {
                continue;
            }
            let Some(deck) = case.project_path().map(Path::to_path_buf) else {
                continue;
            };
            let job = self.submit_stage(case_index, 0, &deck)?;
            cases
                .get_mut(case_index)
                .expect("index inside case set")
                .set_status(RunStatus::Running)?;
            self.progress.push(CaseProgress {
                case_index,
                stage: 0,
                job: Some(job),
                finished: false,
            });
        }

        if async_run {
            return Ok(());
        }
        while self.update(cases)? > 0 {
            std::thread::sleep(self.poll_interval);
        }
        Ok(())
    }

    /// Polls outstanding jobs once (rate limited) and advances pipelines.
    ///
    /// Returns the number of cases still in flight.
    pub fn update(&mut self, cases: &mut RunCaseSet) -> Result<usize> {
        let due = self
            .last_poll
            .map_or(true, |last| last.elapsed() >= self.poll_interval);
        if !due {
            return Ok(self.progress.iter().filter(|p| !p.finished).count());
        }
        self.last_poll = Some(Instant::now());

        for i in 0..self.progress.len() {
            if self.progress[i].finished {
                continue;
            }
            let Some(job) = self.progress[i].job else {
                continue;
            };
            match self.scheduler.status(job)? {
                JobState::Queued | JobState::Running => {}
                JobState::Succeeded => {
                    let case_index = self.progress[i].case_index;
                    let next_stage = self.progress[i].stage + 1;
                    if next_stage < self.apps.len() {
                        let deck = cases
                            .get(case_index)
                            .and_then(|c| c.project_path())
                            .map(Path::to_path_buf)
                            .expect("running case keeps its deck");
                        let job = self.submit_stage(case_index, next_stage, &deck)?;
                        self.progress[i].stage = next_stage;
                        self.progress[i].job = Some(job);
                    } else {
                        self.progress[i].finished = true;
                        self.progress[i].job = None;
                        cases
                            .get_mut(case_index)
                            .expect("index inside case set")
                            .set_status(RunStatus::Completed)?;
                    }
                }
                JobState::Failed => {
                    let case_index = self.progress[i].case_index;
                    let stage = self.progress[i].stage;
                    self.progress[i].finished = true;
                    self.progress[i].job = None;
                    let case = cases.get_mut(case_index).expect("index inside case set");
                    case.set_diagnostic(format!(
                        "pipeline stage {stage} ({}) failed",
                        self.apps[stage].name()
                    ));
                    log::warn!("case {case_index}: stage {stage} failed");
                    case.set_status(RunStatus::Failed)?;
                }
            }
        }
        Ok(self.progress.iter().filter(|p| !p.finished).count())
    }

    /// Aborts the batch: unstarted cases fail immediately, running jobs are
    /// killed and awaited for at most `grace`.
    pub fn abort(&mut self, cases: &mut RunCaseSet, grace: Duration) -> Result<()> {
        // cases that never reached submission
        for case in cases.iter_mut() {
            if case.status() == RunStatus::Scheduled {
                case.set_diagnostic("aborted before submission");
                case.set_status(RunStatus::Failed)?;
            }
        }

        let mut outstanding = Vec::new();
        for progress in &mut self.progress {
            if let Some(job) = progress.job {
                self.scheduler.kill(job)?;
                outstanding.push((progress.case_index, job));
                progress.finished = true;
                progress.job = None;
            }
        }

        let deadline = Instant::now() + grace;
        let mut pending = outstanding;
        while !pending.is_empty() && Instant::now() < deadline {
            pending.retain(|&(_, job)| {
                !matches!(
                    self.scheduler.status(job),
                    Ok(JobState::Succeeded | JobState::Failed)
                )
            });
            if !pending.is_empty() {
                std::thread::sleep(Duration::from_millis(10));
            }
        }

        for progress in &self.progress {
            let case = cases
                .get_mut(progress.case_index)
                .expect("index inside case set");
            if case.status() == RunStatus::Running {
                case.set_diagnostic("aborted on request");
                case.set_status(RunStatus::Failed)?;
            }
        }
        log::warn!("run manager aborted, {} jobs killed", self.progress.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::RunCase;
    use crate::parameter::Parameter;

    fn scheduled_case(dir: &Path, name: &str) -> RunCase {
        let deck = dir.join(name).join("project.yaml");
        std::fs::create_dir_all(deck.parent().unwrap()).unwrap();
        std::fs::write(&deck, "{}\n").unwrap();
        let mut case = RunCase::new(0, vec![Parameter::Scalar(1.0)]);
        case.set_project_path(deck);
        case.set_status(RunStatus::Scheduled).unwrap();
        case
    }

    fn manager_with(stages: Vec<SimApp>) -> RunManager {
        let mut manager = RunManager::new(Box::new(LocalScheduler::new()));
        manager.set_poll_interval(Duration::from_millis(10));
        for stage in stages {
            manager.add_application(stage);
        }
        manager
    }

    #[test]
    fn pipeline_completes_cases() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let mut set = RunCaseSet::new();
        set.add_experiment(
            vec![
                scheduled_case(dir.path(), "Case_1"),
                scheduled_case(dir.path(), "Case_2"),
            ],
            "Tornado",
        )
        .unwrap();

        let mut manager = manager_with(vec![
            SimApp::generic("true"),
            SimApp::generic("true"),
        ]);
        manager.run_scheduled_cases(&mut set, false).unwrap();

        for case in set.iter() {
            assert_eq!(case.status(), RunStatus::Completed);
        }
    }

    #[test]
    fn failing_stage_marks_case_failed_but_not_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("Case_1").join("fail");
        let mut set = RunCaseSet::new();
        set.add_experiment(
            vec![
                scheduled_case(dir.path(), "Case_1"),
                scheduled_case(dir.path(), "Case_2"),
            ],
            "Tornado",
        )
        .unwrap();

        // first case fails in stage 0 because its folder carries the marker
        std::fs::write(&marker, "x").unwrap();
        let mut manager = manager_with(vec![SimApp::generic(
            "test ! -e \"$(dirname \"$0\")/fail\"",
        )]);
        manager.run_scheduled_cases(&mut set, false).unwrap();

        assert_eq!(set.get(0).unwrap().status(), RunStatus::Failed);
        assert!(set.get(0).unwrap().diagnostic().unwrap().contains("stage 0"));
        assert_eq!(set.get(1).unwrap().status(), RunStatus::Completed);
    }

    #[test]
    fn async_run_returns_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = RunCaseSet::new();
        set.add_experiment(vec![scheduled_case(dir.path(), "Case_1")], "Tornado")
            .unwrap();

        let mut manager = manager_with(vec![SimApp::generic("sleep 0.2")]);
        manager.run_scheduled_cases(&mut set, true).unwrap();
        assert_eq!(set.get(0).unwrap().status(), RunStatus::Running);

        loop {
            let remaining = manager.update(&mut set).unwrap();
            if remaining == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(set.get(0).unwrap().status(), RunStatus::Completed);
    }

    #[test]
    fn abort_kills_running_jobs_within_grace() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = RunCaseSet::new();
        set.add_experiment(vec![scheduled_case(dir.path(), "Case_1")], "Tornado")
            .unwrap();

        let mut manager = manager_with(vec![SimApp::generic("sleep 30")]);
        manager.run_scheduled_cases(&mut set, true).unwrap();

        let started = Instant::now();
        manager.abort(&mut set, Duration::from_secs(2)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(set.get(0).unwrap().status(), RunStatus::Failed);
    }

    #[test]
    fn empty_pipeline_is_an_error() {
        let mut set = RunCaseSet::new();
        let mut manager = RunManager::new(Box::new(LocalScheduler::new()));
        let err = manager.run_scheduled_cases(&mut set, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RunManagerError);
    }

    #[test]
    fn reset_keeps_the_pipeline_on_request() {
        let mut manager = manager_with(vec![SimApp::generic("true")]);
        manager.reset(true);
        assert_eq!(manager.applications().len(), 1);
        manager.reset(false);
        assert!(manager.applications().is_empty());
    }
}
