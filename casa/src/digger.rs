//! Observable harvesting through the simulator's data-mining table.
//!
//! Before submission the digger injects one request row per observable
//! component into each case deck; the simulator answers by overwriting the
//! value column on completion. After the run the digger reads the answers
//! back and builds one [`ObsValue`] per observable per case. Values the
//! simulator could not compute stay at the undefined sentinel and become
//! NaN components, excluded from RMSE with a warning.

use super::case::{RunCaseSet, RunStatus};
use super::error::{Error, ErrorKind, Result};
use super::observable::{Locator, ObsValue};
use super::project::{Project, Record, Value};
use super::space::ObservableSpace;

/// Deck table holding data-mining requests and answers.
pub const DATA_MINING_TABLE: &str = "DataMiningIoTbl";

/// Sentinel the simulator family uses for values it can not compute.
pub const UNDEFINED_VALUE: f64 = -9999.0;

/// Injects requests into decks and collects answers into observables.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataDigger;

fn request_rows(observables: &ObservableSpace) -> Vec<Record> {
    let mut rows = Vec::with_capacity(observables.total_dimension());
    for observable in observables.iter() {
        for component in 0..observable.dimension() {
            let mut row = Record::new();
            row.insert("Time".to_owned(), Value::Float(observable.simulation_time()));
            row.insert(
                "PropertyName".to_owned(),
                Value::Text(observable.property().to_owned()),
            );
            match observable.locator() {
                Locator::GridIjk { i, j, k } => {
                    row.insert("I".to_owned(), Value::Int(i64::from(*i)));
                    row.insert("J".to_owned(), Value::Int(i64::from(*j)));
                    row.insert("K".to_owned(), Value::Int(i64::from(*k)));
                }
                Locator::PointXyz { x, y, z } => {
                    row.insert("XCoord".to_owned(), Value::Float(*x));
                    row.insert("YCoord".to_owned(), Value::Float(*y));
                    row.insert("ZCoord".to_owned(), Value::Float(*z));
                }
                Locator::WellTrap { name, x, y, .. } => {
                    row.insert("WellName".to_owned(), Value::Text(name.clone()));
                    row.insert("XCoord".to_owned(), Value::Float(*x));
                    row.insert("YCoord".to_owned(), Value::Float(*y));
                    row.insert("SampleIdx".to_owned(), Value::Int(component as i64));
                }
            }
            row.insert("Value".to_owned(), Value::Float(UNDEFINED_VALUE));
            rows.push(row);
        }
    }
    rows
}

impl DataDigger {
    /// Rewrites the data-mining request table of every scheduled case deck.
    ///
    /// Must run after mutation and before submission; the row order is the
    /// observable-space order, one row per component.
    pub fn request_observables(
        observables: &ObservableSpace,
        cases: &mut RunCaseSet,
    ) -> Result<()> {
        let rows = request_rows(observables);
        for case in cases.iter_mut() {
            if case.status() != RunStatus::Scheduled {
                continue;
            }
            let Some(deck_path) = case.project_path() else {
                continue;
            };
            let mut deck = Project::load(deck_path)?;
            let table = deck.table_mut(DATA_MINING_TABLE);
            table.clear();
            for row in &rows {
                table.push_row(row.clone());
            }
            deck.save(deck_path)?;
        }
        Ok(())
    }

    /// Reads the answers of every completed case and populates its
    /// observable values.
    pub fn collect_run_results(
        observables: &ObservableSpace,
        cases: &mut RunCaseSet,
    ) -> Result<()> {
        for case in cases.iter_mut() {
            if case.status() != RunStatus::Completed || !case.observables().is_empty() {
                continue;
            }
            let Some(deck_path) = case.project_path() else {
                continue;
            };
            let deck = Project::load(deck_path)?;
            let table = deck.table(DATA_MINING_TABLE).ok_or_else(|| {
                Error::new(
                    ErrorKind::UndefinedValue,
                    format!(
                        "case {}: deck has no '{DATA_MINING_TABLE}' table",
                        case.id()
                    ),
                )
            })?;
            if table.len() != observables.total_dimension() {
                return Err(Error::new(
                    ErrorKind::UndefinedValue,
                    format!(
                        "case {}: expected {} data-mining rows, found {}",
                        case.id(),
                        observables.total_dimension(),
                        table.len()
                    ),
                ));
            }

            let mut values = Vec::with_capacity(observables.len());
            let mut row_index = 0;
            for observable in observables.iter() {
                let mut components = Vec::with_capacity(observable.dimension());
                for component in 0..observable.dimension() {
                    let answer = table
                        .row(row_index)
                        .and_then(|row| row.get("Value"))
                        .ok_or_else(|| {
                            Error::new(
                                ErrorKind::UndefinedValue,
                                format!("case {}: data-mining row {row_index} has no value", case.id()),
                            )
                        })?
                        .as_float()?;
                    if (answer - UNDEFINED_VALUE).abs() < f64::EPSILON.max(1e-9) {
                        log::warn!(
                            "case {}: observable '{}' component {component} is undefined \
                             and will be excluded from RMSE",
                            case.id(),
                            observable.name()
                        );
                        components.push(f64::NAN);
                    } else {
                        components.push(answer);
                    }
                    row_index += 1;
                }
                values.push(ObsValue::new(components));
            }
            case.set_observables(values);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::RunCase;
    use crate::observable::Observable;
    use crate::parameter::Parameter;
    use std::path::Path;

    fn observables() -> ObservableSpace {
        let mut space = ObservableSpace::new();
        space
            .add(Observable::new(
                "Temp@2000m",
                "Temperature",
                0.0,
                Locator::PointXyz {
                    x: 1000.0,
                    y: 1000.0,
                    z: 2000.0,
                },
            ))
            .unwrap();
        space
            .add(Observable::new(
                "VRe@Well-1",
                "Vr",
                0.0,
                Locator::WellTrap {
                    name: "Well-1".to_owned(),
                    x: 500.0,
                    y: 500.0,
                    samples: 2,
                },
            ))
            .unwrap();
        space
    }

    fn completed_case(dir: &Path) -> RunCase {
        let deck = dir.join("Case_1").join("project.yaml");
        Project::new().save(&deck).unwrap();
        let mut case = RunCase::new(0, vec![Parameter::Scalar(1.0)]);
        case.set_project_path(deck);
        case.set_status(RunStatus::Scheduled).unwrap();
        case
    }

    // stand-in for the simulator: answer every request row
    fn answer_requests(deck_path: &Path, answers: &[f64]) {
        let mut deck = Project::load(deck_path).unwrap();
        let table = deck.table_mut(DATA_MINING_TABLE);
        for (row, answer) in table.iter_mut().zip(answers) {
            row.insert("Value".to_owned(), Value::Float(*answer));
        }
        deck.save(deck_path).unwrap();
    }

    #[test]
    fn request_then_collect_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let obs = observables();

        let mut set = RunCaseSet::new();
        set.add_experiment(vec![completed_case(dir.path())], "Tornado").unwrap();
        DataDigger::request_observables(&obs, &mut set).unwrap();

        let deck_path = set.get(0).unwrap().project_path().unwrap().to_path_buf();
        let deck = Project::load(&deck_path).unwrap();
        let table = deck.table(DATA_MINING_TABLE).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.row(0).unwrap().get("PropertyName").unwrap(),
            &Value::Text("Temperature".to_owned())
        );
        assert_eq!(
            table.row(2).unwrap().get("SampleIdx").unwrap(),
            &Value::Int(1)
        );

        answer_requests(&deck_path, &[84.5, 0.62, 0.71]);
        {
            let case = set.get_mut(0).unwrap();
            case.set_status(RunStatus::Running).unwrap();
            case.set_status(RunStatus::Completed).unwrap();
        }
        DataDigger::collect_run_results(&obs, &mut set).unwrap();

        let case = set.get(0).unwrap();
        assert_eq!(case.observables().len(), 2);
        assert_eq!(case.obs_value(0).unwrap().values(), &[84.5]);
        assert_eq!(case.obs_value(1).unwrap().values(), &[0.62, 0.71]);
    }

    #[test]
    fn unanswered_requests_become_undefined() {
        let dir = tempfile::tempdir().unwrap();
        let obs = observables();

        let mut set = RunCaseSet::new();
        set.add_experiment(vec![completed_case(dir.path())], "Tornado").unwrap();
        DataDigger::request_observables(&obs, &mut set).unwrap();

        let deck_path = set.get(0).unwrap().project_path().unwrap().to_path_buf();
        answer_requests(&deck_path, &[84.5, UNDEFINED_VALUE, 0.71]);
        {
            let case = set.get_mut(0).unwrap();
            case.set_status(RunStatus::Running).unwrap();
            case.set_status(RunStatus::Completed).unwrap();
        }
        DataDigger::collect_run_results(&obs, &mut set).unwrap();

        let well = set.get(0).unwrap().obs_value(1).unwrap().clone();
        assert!(!well.is_defined());
        assert!(well.values()[0].is_nan());
        assert_eq!(well.values()[1], 0.71);
    }
}
