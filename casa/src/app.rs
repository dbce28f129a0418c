//! Pipeline applications: the simulator executables driven per case.
//!
//! An application is a named executable with its option list, cpu count and
//! MPI-parallel flag. For every run case it yields a shell script that sets
//! the environment and invokes the binary on the case deck. Environment
//! variables `CAULDRON_VERSION`, `IBS_ROOT`, `CAULDRON_MPIRUN_CMD` and
//! `SIEPRTS_LICENSE_FILE` seed the defaults; programmatic setters override
//! them.

use super::error::{Error, ErrorKind, Result};
use super::serial::{Deserializer, Serializer};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const DEFAULT_VERSION: &str = "v2014.1007";
const DEFAULT_ROOT: &str = "/apps/sssdev/ibs";
const DEFAULT_LICENSE: &str = "3000@license-1:3000@license-2";

/// Shell dialect used for generated scripts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ShellKind {
    /// Bourne-again shell, the default.
    #[default]
    Bash,
    /// C shell.
    Csh,
}

/// One stage of the per-case application pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct SimApp {
    name: String,
    parallel: bool,
    cpus: usize,
    options: Vec<String>,
    env: BTreeMap<String, String>,
    version: String,
    root_path: PathBuf,
    mpirun_cmd: String,
    shell: ShellKind,
    custom_script: Option<String>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

impl SimApp {
    /// Creates an application stage, seeding version, install root, MPI
    /// launcher and license server from the environment.
    #[must_use]
    pub fn new(name: impl Into<String>, cpus: usize, parallel: bool) -> Self {
        let mut env = BTreeMap::new();
        env.insert(
            "SIEPRTS_LICENSE_FILE".to_owned(),
            env_or("SIEPRTS_LICENSE_FILE", DEFAULT_LICENSE),
        );
        Self {
            name: name.into(),
            parallel,
            cpus: cpus.max(1),
            options: Vec::new(),
            env,
            version: env_or("CAULDRON_VERSION", DEFAULT_VERSION),
            root_path: PathBuf::from(env_or("IBS_ROOT", DEFAULT_ROOT)),
            mpirun_cmd: env_or("CAULDRON_MPIRUN_CMD", "mpirun"),
            shell: ShellKind::default(),
            custom_script: None,
        }
    }

    /// Creates a stage running an arbitrary command line instead of an
    /// installed simulator binary.
    #[must_use]
    pub fn generic(command_line: impl Into<String>) -> Self {
        let mut result = Self::new("generic", 1, false);
        result.custom_script = Some(command_line.into());
        result
    }

    /// Application name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of cpus requested from the scheduler.
    #[must_use]
    pub const fn cpus(&self) -> usize {
        self.cpus
    }

    /// Whether the stage runs under the MPI launcher.
    #[must_use]
    pub const fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Overrides the simulator version selecting the binary path.
    pub fn set_version(&mut self, version: impl Into<String>) {
        let version = version.into();
        if !version.is_empty() {
            self.version = version;
        }
    }

    /// Simulator version in use.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Overrides the simulator install prefix.
    pub fn set_root_path(&mut self, root: impl Into<PathBuf>) {
        self.root_path = root.into();
    }

    /// Overrides the MPI launcher command line.
    pub fn set_mpirun_cmd(&mut self, cmd: impl Into<String>) {
        self.mpirun_cmd = cmd.into();
    }

    /// Sets the cpu count for a parallel stage.
    pub fn set_cpus(&mut self, cpus: usize) {
        self.cpus = cpus.max(1);
    }

    /// Selects the shell dialect of generated scripts.
    pub fn set_shell(&mut self, shell: ShellKind) {
        self.shell = shell;
    }

    /// Appends a command-line option.
    pub fn add_option(&mut self, option: impl Into<String>) {
        self.options.push(option.into());
    }

    /// Sets one environment variable for generated scripts, overriding any
    /// inherited default.
    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    /// Full path of the versioned application binary.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        self.root_path.join(&self.version).join("bin").join(&self.name)
    }

    /// Generates the per-case shell script: environment exports followed by
    /// the application invocation on the input and output decks.
    #[must_use]
    pub fn generate_script(&self, in_deck: &Path, out_deck: &Path) -> String {
        let mut script = String::new();
        match self.shell {
            ShellKind::Bash => script.push_str("#!/bin/bash\n"),
            ShellKind::Csh => script.push_str("#!/bin/csh\n"),
        }
        for (name, value) in &self.env {
            match self.shell {
                ShellKind::Bash => {
                    let _ = writeln!(script, "export {name}=\"{value}\"");
                }
                ShellKind::Csh => {
                    let _ = writeln!(script, "setenv {name} \"{value}\"");
                }
            }
        }

        if let Some(custom) = &self.custom_script {
            script.push_str(custom);
            script.push('\n');
            return script;
        }

        let mut command = String::new();
        if self.parallel {
            let _ = write!(command, "{} -np {} ", self.mpirun_cmd, self.cpus);
        }
        let _ = write!(command, "{}", self.binary_path().display());
        for option in &self.options {
            let _ = write!(command, " {option}");
        }
        let _ = write!(
            command,
            " -project \"{}\" -save \"{}\"",
            in_deck.display(),
            out_deck.display()
        );
        script.push_str(&command);
        script.push('\n');
        script
    }

    /// Writes the application definition as one object group.
    pub fn save_to(&self, ser: &mut Serializer) -> Result<()> {
        ser.begin_object("SimApp", &self.name, 0)?;
        ser.save_string(&self.name, "Name")?;
        ser.save_bool(self.parallel, "Parallel")?;
        ser.save_ullong(self.cpus as u64, "Cpus")?;
        ser.save_string_vec(&self.options, "Options")?;
        let keys: Vec<String> = self.env.keys().cloned().collect();
        let values: Vec<String> = self.env.values().cloned().collect();
        ser.save_string_vec(&keys, "EnvKeys")?;
        ser.save_string_vec(&values, "EnvValues")?;
        ser.save_string(&self.version, "Version")?;
        ser.save_string(&self.root_path.to_string_lossy(), "RootPath")?;
        ser.save_string(&self.mpirun_cmd, "MpirunCmd")?;
        ser.save_uint(matches!(self.shell, ShellKind::Csh).into(), "Shell")?;
        ser.save_bool(self.custom_script.is_some(), "HasCustom")?;
        if let Some(custom) = &self.custom_script {
            ser.save_string(custom, "Custom")?;
        }
        Ok(())
    }

    /// Reads an application written by [`Self::save_to`].
    pub fn load_from(de: &mut Deserializer) -> Result<Self> {
        let (stored_type, _, version) = de.load_any_object_header()?;
        if stored_type != "SimApp" || version > 0 {
            return Err(Error::new(
                ErrorKind::DeserializationError,
                format!("expected a SimApp of version 0, found '{stored_type}' v{version}"),
            ));
        }
        let name = de.load_string("Name")?;
        let parallel = de.load_bool("Parallel")?;
        let cpus = de.load_ullong("Cpus")? as usize;
        let options = de.load_string_vec("Options")?;
        let keys = de.load_string_vec("EnvKeys")?;
        let values = de.load_string_vec("EnvValues")?;
        let env: BTreeMap<String, String> = keys.into_iter().zip(values).collect();
        let version_str = de.load_string("Version")?;
        let root_path = PathBuf::from(de.load_string("RootPath")?);
        let mpirun_cmd = de.load_string("MpirunCmd")?;
        let shell = if de.load_uint("Shell")? == 1 {
            ShellKind::Csh
        } else {
            ShellKind::Bash
        };
        let custom_script = if de.load_bool("HasCustom")? {
            Some(de.load_string("Custom")?)
        } else {
            None
        };
        Ok(Self {
            name,
            parallel,
            cpus,
            options,
            env,
            version: version_str,
            root_path,
            mpirun_cmd,
            shell,
            custom_script,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_script_uses_mpi_launcher() {
        let mut app = SimApp::new("fastcauldron", 4, true);
        app.set_version("v2019.12");
        app.set_root_path("/opt/ibs");
        app.set_mpirun_cmd("mpirun");
        app.add_option("-temperature");
        app.set_env("SIEPRTS_LICENSE_FILE", "3000@flexlm");

        let script = app.generate_script(
            Path::new("Case_1/project.yaml"),
            Path::new("Case_1/project_out.yaml"),
        );
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("export SIEPRTS_LICENSE_FILE=\"3000@flexlm\""));
        assert!(script.contains(
            "mpirun -np 4 /opt/ibs/v2019.12/bin/fastcauldron -temperature \
             -project \"Case_1/project.yaml\" -save \"Case_1/project_out.yaml\""
        ));
    }

    #[test]
    fn serial_script_skips_mpi_launcher() {
        let mut app = SimApp::new("track1d", 1, false);
        app.set_version("v2019.12");
        app.set_root_path("/opt/ibs");
        let script = app.generate_script(Path::new("in.yaml"), Path::new("out.yaml"));
        assert!(!script.contains("mpirun"));
        assert!(script.contains("/opt/ibs/v2019.12/bin/track1d"));
    }

    #[test]
    fn csh_scripts_use_setenv() {
        let mut app = SimApp::new("fastgenex6", 1, false);
        app.set_shell(ShellKind::Csh);
        app.set_env("IBS_ROOT", "/opt/ibs");
        let script = app.generate_script(Path::new("in.yaml"), Path::new("out.yaml"));
        assert!(script.starts_with("#!/bin/csh\n"));
        assert!(script.contains("setenv IBS_ROOT \"/opt/ibs\""));
    }

    #[test]
    fn generic_stage_runs_the_given_command() {
        let app = SimApp::generic("echo done > marker.txt");
        let script = app.generate_script(Path::new("in.yaml"), Path::new("out.yaml"));
        assert!(script.contains("echo done > marker.txt"));
        assert!(!script.contains("-project"));
    }

    #[test]
    fn programmatic_version_overrides_environment() {
        let mut app = SimApp::new("fastmig", 1, false);
        app.set_version("v2042.1");
        assert_eq!(app.version(), "v2042.1");
        assert!(app.binary_path().ends_with("v2042.1/bin/fastmig"));
    }
}
