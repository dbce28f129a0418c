//! Case mutation: materializing run cases as project decks on disk.
//!
//! Every mutation pass works on a deep copy of the base-case deck, injects
//! the case parameters in declaration order, validates the result and only
//! then serializes it under `<root>/Iteration_<k>/Case_<i>/`. A failing case
//! is marked `Failed` with a diagnostic and does not stop the batch.

use super::case::{RunCaseSet, RunStatus};
use super::error::{Error, ErrorKind, Result};
use super::project::Project;
use super::space::ParameterSpace;
use std::path::{Path, PathBuf};

/// File name of a generated case deck inside its case folder.
pub const CASE_DECK_NAME: &str = "project.yaml";

/// Folder of one case inside one scenario iteration.
#[must_use]
pub fn case_directory(root: &Path, iteration: usize, case_id: usize) -> PathBuf {
    root.join(format!("Iteration_{iteration}"))
        .join(format!("Case_{}", case_id + 1))
}

/// Mutates every not-yet-submitted case of `case_set` into a deck on disk.
///
/// Successful cases transition to `Scheduled` and record their deck path;
/// failing ones transition to `Failed` with the accumulated diagnostic and
/// leave no deck behind.
pub fn apply_mutations(
    base: &Project,
    space: &ParameterSpace,
    case_set: &mut RunCaseSet,
    root: &Path,
    iteration: usize,
) -> Result<()> {
    std::fs::create_dir_all(root).map_err(|err| {
        Error::new(
            ErrorKind::WrongPath,
            format!("can not create scenario location '{}': {err}", root.display()),
        )
    })?;

    for case in case_set.iter_mut() {
        if case.status() != RunStatus::NotSubmitted {
            continue;
        }
        let case_dir = case_directory(root, iteration, case.id());

        let mut mutated = base.clone();
        let mut diagnostics = Vec::new();

        for (parameter, definition) in case.parameters().iter().zip(space.iter()) {
            if let Err(err) = parameter.set_in_project(definition, &mut mutated, case.id(), &case_dir)
            {
                diagnostics.push(err.to_string());
            }
        }
        if diagnostics.is_empty() {
            for (parameter, definition) in case.parameters().iter().zip(space.iter()) {
                if let Err(err) = parameter.validate(definition, &mutated) {
                    diagnostics.push(err.to_string());
                }
            }
        }

        if diagnostics.is_empty() {
            let deck_path = case_dir.join(CASE_DECK_NAME);
            match mutated.save(&deck_path) {
                Ok(()) => {
                    case.set_project_path(deck_path);
                    case.set_status(RunStatus::Scheduled)?;
                }
                Err(err) => {
                    diagnostics.push(err.to_string());
                }
            }
        }

        if !diagnostics.is_empty() {
            let diagnostic = diagnostics.join("; ");
            log::warn!("case {} failed to mutate: {diagnostic}", case.id());
            case.set_diagnostic(diagnostic);
            case.set_status(RunStatus::Failed)?;
        }
    }
    Ok(())
}

/// Re-validates the decks of all scheduled cases against their parameters.
///
/// Mismatches mark the case `Failed` with a diagnostic; the scan continues
/// with the remaining cases.
pub fn validate_case_set(space: &ParameterSpace, case_set: &mut RunCaseSet) -> Result<()> {
    for case in case_set.iter_mut() {
        if case.status() != RunStatus::Scheduled {
            continue;
        }
        let Some(deck_path) = case.project_path().map(Path::to_path_buf) else {
            case.set_diagnostic("scheduled case has no generated deck");
            case.set_status(RunStatus::Failed)?;
            continue;
        };

        let outcome = Project::load(&deck_path).and_then(|deck| {
            let mut mismatches = Vec::new();
            for (parameter, definition) in case.parameters().iter().zip(space.iter()) {
                if let Err(err) = parameter.validate(definition, &deck) {
                    mismatches.push(err.to_string());
                }
            }
            if mismatches.is_empty() {
                Ok(())
            } else {
                Err(Error::new(
                    ErrorKind::ValidationError,
                    mismatches.join("; "),
                ))
            }
        });

        if let Err(err) = outcome {
            log::warn!("case {} failed validation: {err}", case.id());
            case.set_diagnostic(err.to_string());
            case.set_status(RunStatus::Failed)?;
        }
    }
    Ok(())
}
