//! In-memory model of a simulator project deck.
//!
//! A deck is a set of named tables, each a list of records mapping column
//! names to typed values. Scenario components only ever touch the tables
//! they know about; everything else round-trips untouched.

use super::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A single cell of a project table.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer cell.
    Int(i64),
    /// Floating-point cell.
    Float(f64),
    /// Text cell, also used for grid-map references.
    Text(String),
}

impl Value {
    /// Returns the cell as a float, converting integer cells on the fly.
    pub fn as_float(&self) -> Result<f64> {
        match self {
            Self::Int(v) => Ok(*v as f64),
            Self::Float(v) => Ok(*v),
            Self::Text(t) => Err(Error::new(
                ErrorKind::UndefinedValue,
                format!("expected a number, found text '{t}'"),
            )),
        }
    }

    /// Returns the cell as text.
    pub fn as_text(&self) -> Result<&str> {
        match self {
            Self::Text(t) => Ok(t),
            _ => Err(Error::new(ErrorKind::UndefinedValue, "expected text cell")),
        }
    }
}

/// One row of a table.
pub type Record = BTreeMap<String, Value>;

/// A named list of records.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Table {
    rows: Vec<Record>,
}

impl Table {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read-only access to row `i`.
    #[must_use]
    pub fn row(&self, i: usize) -> Option<&Record> {
        self.rows.get(i)
    }

    /// Mutable access to row `i`.
    pub fn row_mut(&mut self, i: usize) -> Option<&mut Record> {
        self.rows.get_mut(i)
    }

    /// Appends a row and returns its index.
    pub fn push_row(&mut self, row: Record) -> usize {
        self.rows.push(row);
        self.rows.len() - 1
    }

    /// Removes all rows.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Iterator over all rows.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter()
    }

    /// Mutable iterator over all rows.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.rows.iter_mut()
    }
}

/// A complete project deck.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Project {
    tables: BTreeMap<String, Table>,
}

impl Project {
    /// Creates an empty deck.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a deck from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| {
            Error::new(
                ErrorKind::IoError,
                format!("can not open project '{}': {err}", path.display()),
            )
        })?;
        serde_yaml::from_reader(BufReader::new(file)).map_err(|err| {
            Error::new(
                ErrorKind::DeserializationError,
                format!("malformed project '{}': {err}", path.display()),
            )
        })
    }

    /// Writes the deck to a YAML file, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_yaml::to_writer(BufWriter::new(file), self).map_err(|err| {
            Error::new(
                ErrorKind::SerializationError,
                format!("can not write project '{}': {err}", path.display()),
            )
        })
    }

    /// Returns the named table if present.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Returns the named table, creating it empty when absent.
    pub fn table_mut(&mut self, name: &str) -> &mut Table {
        self.tables.entry(name.to_owned()).or_default()
    }

    /// Reads one cell.
    pub fn value(&self, table: &str, row: usize, column: &str) -> Result<&Value> {
        self.tables
            .get(table)
            .and_then(|t| t.row(row))
            .and_then(|r| r.get(column))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NonexistingId,
                    format!("no cell {table}[{row}].{column} in project"),
                )
            })
    }

    /// Writes one cell, growing the table with empty rows when needed.
    pub fn set_value(&mut self, table: &str, row: usize, column: &str, value: Value) {
        let table = self.table_mut(table);
        while table.len() <= row {
            table.push_row(Record::new());
        }
        // the row exists now by construction
        table.rows[row].insert(column.to_owned(), value);
    }

    /// Table names in deterministic order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// Splits a semantic key of the form `Table:Column` into its two halves.
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    key.split_once(':').ok_or_else(|| {
        Error::new(
            ErrorKind::NonexistingId,
            format!("semantic key '{key}' is not of the form Table:Column"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn sample() -> Project {
        let mut project = Project::new();
        project.set_value("BasementIoTbl", 0, "TopCrustHeatProd", Value::Float(2.5));
        project.set_value("BasementIoTbl", 0, "CrustHeatPDecayConst", Value::Float(10000.0));
        project.set_value("StratIoTbl", 1, "LayerName", Value::Text("Miocene".to_owned()));
        project
    }

    #[test]
    fn cell_round_trip_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.yaml");

        let project = sample();
        project.save(&path).unwrap();
        let loaded = Project::load(&path).unwrap();

        assert_eq!(project, loaded);
        let cell = loaded.value("BasementIoTbl", 0, "TopCrustHeatProd").unwrap();
        assert_approx_eq!(f64, cell.as_float().unwrap(), 2.5, epsilon = 1e-6);
    }

    #[test]
    fn unknown_tables_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.yaml");

        let mut project = sample();
        project.set_value("SomeVendorTbl", 0, "Payload", Value::Int(42));
        project.save(&path).unwrap();

        let loaded = Project::load(&path).unwrap();
        assert_eq!(
            loaded.value("SomeVendorTbl", 0, "Payload").unwrap(),
            &Value::Int(42)
        );
    }

    #[test]
    fn missing_cell_is_nonexisting_id() {
        let project = sample();
        let err = project.value("BasementIoTbl", 5, "TopCrustHeatProd").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NonexistingId);
    }

    #[test]
    fn split_semantic_key() {
        let (table, column) = split_key("BasementIoTbl:TopCrustHeatProd").unwrap();
        assert_eq!(table, "BasementIoTbl");
        assert_eq!(column, "TopCrustHeatProd");
        assert!(split_key("NoSeparator").is_err());
    }
}
