//! Input data validation against a manifest's declared data contract.
//!
//! Stateless and re-entrant: the same manifest can be checked against any
//! number of payloads, from any thread.

use serde_json::Value;

use crate::data::{AddinData, Column, ScalarType};
use crate::error::{AddinError, Result};

use super::types::{ColumnSpec, Manifest};

/// Check `data` against `manifest.input_data_types`.
///
/// A manifest with no declared input types accepts anything. Otherwise the
/// container type of `data` must match at least one descriptor, and every
/// column constraint of every matching descriptor must hold.
///
/// # Errors
/// `AddinError::DataValidation` naming the first violated constraint.
pub fn validate_input_data(data: &AddinData, manifest: &Manifest) -> Result<()> {
    let declared = manifest.input_data_types();
    if declared.is_empty() {
        return Ok(());
    }

    let kind = data.kind();
    let mut matching = declared.iter().filter(|t| t.kind == kind).peekable();
    if matching.peek().is_none() {
        let accepted: Vec<String> = declared.iter().map(|t| t.kind.to_string()).collect();
        return Err(AddinError::DataValidation(format!(
            "Input data must be one of [{}], got {}",
            accepted.join(", "),
            kind
        )));
    }

    for descriptor in matching {
        for spec in &descriptor.columns {
            check_column(data, spec)?;
        }
    }

    Ok(())
}

/// How a declared column appears in the payload.
enum Lookup {
    Missing,
    /// Present with no values; satisfies any declared type.
    Empty,
    /// Present; `None` when the values have no single scalar type.
    Present(Option<ScalarType>),
}

impl Lookup {
    fn of(col: &Column) -> Self {
        if col.is_empty() {
            Self::Empty
        } else {
            Self::Present(Some(col.dtype()))
        }
    }
}

fn lookup(data: &AddinData, name: &str) -> Lookup {
    match data {
        AddinData::DataFrame(df) => df.column(name).map_or(Lookup::Missing, Lookup::of),
        AddinData::Series(col) if col.name == name => Lookup::of(col),
        AddinData::Mapping(map) => match map.get(name) {
            Some(Value::Array(items)) if items.is_empty() => Lookup::Empty,
            Some(Value::Array(items)) => {
                Lookup::Present(Column::from_json_values(name, items).ok().map(|c| c.dtype()))
            }
            Some(scalar) => Lookup::Present(
                Column::from_json_values(name, std::slice::from_ref(scalar))
                    .ok()
                    .map(|c| c.dtype()),
            ),
            None => Lookup::Missing,
        },
        _ => Lookup::Missing,
    }
}

fn check_column(data: &AddinData, spec: &ColumnSpec) -> Result<()> {
    match lookup(data, &spec.name) {
        Lookup::Missing => Err(AddinError::DataValidation(format!(
            "Missing required column: {}",
            spec.name
        ))),
        Lookup::Empty => Ok(()),
        Lookup::Present(Some(actual)) if actual.satisfies(spec.dtype) => Ok(()),
        Lookup::Present(actual) => Err(AddinError::DataValidation(format!(
            "Column {} must be {}, got {}",
            spec.name,
            spec.dtype,
            actual.map_or_else(|| "mixed".to_string(), |t| t.to_string())
        ))),
    }
}
