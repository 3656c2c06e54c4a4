//! Manifest parsing and validation for PromptLab add-ins
//!
//! This module turns a YAML add-in descriptor into a [`Manifest`]. Files on
//! disk and in-memory mappings go through the same field-level checks, so
//! discovery and unit tests share one validation path.
//!
//! # Example manifest
//!
//! ```yaml
//! name: score-summary
//! version: 0.2.0
//! author: "Research Team <research@example.com>"
//! description: Summary statistics over judged scores
//! input_data_types:
//!   - type: DataFrame
//!     columns:
//!       - name: score
//!         type: float
//! metrics:
//!   - name: mean
//!     description: Mean judged score
//! dependencies:
//!   - promptlab>=0.4
//! entry_point: promptlab.stats.DescriptiveStats
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

use crate::data::{ContainerKind, ScalarType};
use crate::error::{AddinError, Result};

use super::types::{
    parse_lenient_version, ColumnSpec, Dependency, InputDataType, Manifest, MetricSpec,
};

/// Fields without which a manifest is rejected outright.
pub const REQUIRED_FIELDS: [&str; 3] = ["name", "version", "entry_point"];

static ENTRY_POINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+$")
        .expect("entry point pattern is valid")
});

/// Where a manifest comes from.
#[derive(Debug, Clone, Copy)]
pub enum ManifestSource<'a> {
    /// A YAML file on disk.
    Path(&'a Path),
    /// An already-parsed YAML document.
    Mapping(&'a Value),
}

impl<'a> From<&'a Path> for ManifestSource<'a> {
    fn from(path: &'a Path) -> Self {
        Self::Path(path)
    }
}

impl<'a> From<&'a PathBuf> for ManifestSource<'a> {
    fn from(path: &'a PathBuf) -> Self {
        Self::Path(path.as_path())
    }
}

impl<'a> From<&'a Value> for ManifestSource<'a> {
    fn from(value: &'a Value) -> Self {
        Self::Mapping(value)
    }
}

/// Validate a manifest from a file path or an in-memory mapping.
///
/// Reads the file when given a path; otherwise has no side effects.
///
/// # Errors
/// - `AddinError::Io` if the file cannot be read
/// - `AddinError::Manifest` for malformed YAML or any failed field check
pub fn validate_manifest<'a>(source: impl Into<ManifestSource<'a>>) -> Result<Manifest> {
    match source.into() {
        ManifestSource::Mapping(value) => validate_mapping(value),
        ManifestSource::Path(path) => {
            let content = fs::read_to_string(path)?;
            let value: Value = serde_yaml::from_str(&content).map_err(|e| {
                AddinError::Manifest(format!("{}: invalid YAML: {}", path.display(), e))
            })?;
            validate_mapping(&value).map_err(|e| match e {
                AddinError::Manifest(msg) => {
                    AddinError::Manifest(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })
        }
    }
}

fn validate_mapping(value: &Value) -> Result<Manifest> {
    if !value.is_mapping() {
        return Err(AddinError::Manifest(
            "Manifest must be a mapping of fields".to_string(),
        ));
    }

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| value.get(*field).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(AddinError::Manifest(format!(
            "Missing required fields: {:?}",
            missing
        )));
    }

    let name = required_string(value, "name")?;
    let version = required_string(value, "version")?;
    let entry_point = required_string(value, "entry_point")?;
    let author = optional_string(value, "author")?;
    let description = optional_string(value, "description")?;
    let category = Some(optional_string(value, "category")?)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    if parse_lenient_version(&version).is_err() {
        return Err(AddinError::Manifest(format!(
            "'version' must be a semantic version, got '{}'",
            version
        )));
    }

    if !ENTRY_POINT_RE.is_match(&entry_point) {
        return Err(AddinError::Manifest(format!(
            "'entry_point' must be a dotted path like module.ClassName, got '{}'",
            entry_point
        )));
    }

    let input_data_types = sequence(value, "input_data_types")?
        .iter()
        .enumerate()
        .map(|(idx, item)| parse_input_data_type(idx, item))
        .collect::<Result<Vec<_>>>()?;

    let metrics = sequence(value, "metrics")?
        .iter()
        .map(parse_metric)
        .collect::<Result<Vec<_>>>()?;

    let dependencies = sequence(value, "dependencies")?
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| {
                    AddinError::Manifest("Each dependency must be a string".to_string())
                })?
                .parse::<Dependency>()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Manifest {
        name,
        version,
        author,
        description,
        category,
        input_data_types,
        metrics,
        dependencies,
        entry_point,
    })
}

fn required_string(value: &Value, field: &str) -> Result<String> {
    let s = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AddinError::Manifest(format!("'{}' must be a string", field)))?;
    if s.trim().is_empty() {
        return Err(AddinError::Manifest(format!("'{}' must not be empty", field)));
    }
    Ok(s.to_string())
}

fn optional_string(value: &Value, field: &str) -> Result<String> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(AddinError::Manifest(format!("'{}' must be a string", field))),
    }
}

/// A list-valued field; absent or null means empty.
fn sequence<'v>(value: &'v Value, field: &str) -> Result<&'v [Value]> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Sequence(items)) => Ok(items.as_slice()),
        Some(_) => Err(AddinError::Manifest(format!("'{}' must be a list", field))),
    }
}

fn parse_container(keyword: &str) -> Result<ContainerKind> {
    ContainerKind::from_keyword(keyword).ok_or_else(|| {
        AddinError::Manifest(format!(
            "Unrecognized container type '{}' in input_data_types",
            keyword
        ))
    })
}

fn parse_input_data_type(idx: usize, item: &Value) -> Result<InputDataType> {
    match item {
        Value::String(keyword) => Ok(InputDataType {
            kind: parse_container(keyword)?,
            columns: Vec::new(),
        }),
        Value::Mapping(_) => {
            let kind = match item.get("type") {
                None | Some(Value::Null) => None,
                Some(Value::String(keyword)) => Some(parse_container(keyword)?),
                Some(_) => {
                    return Err(AddinError::Manifest(format!(
                        "input_data_types[{}].type must be a string",
                        idx
                    )))
                }
            };

            let columns = match item.get("columns") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Sequence(cols)) => cols
                    .iter()
                    .enumerate()
                    .map(|(col_idx, col)| parse_column(idx, col_idx, col))
                    .collect::<Result<Vec<_>>>()?,
                Some(_) => {
                    return Err(AddinError::Manifest(format!(
                        "input_data_types[{}].columns must be a list",
                        idx
                    )))
                }
            };

            if kind.is_none() && columns.is_empty() {
                return Err(AddinError::Manifest(format!(
                    "input_data_types[{}] must declare a 'type' or 'columns'",
                    idx
                )));
            }

            Ok(InputDataType {
                // A bare column list describes a table.
                kind: kind.unwrap_or(ContainerKind::DataFrame),
                columns,
            })
        }
        _ => Err(AddinError::Manifest(format!(
            "input_data_types[{}] must be a type name or a mapping",
            idx
        ))),
    }
}

fn parse_column(idx: usize, col_idx: usize, col: &Value) -> Result<ColumnSpec> {
    let field = |key: &str| -> Result<&str> {
        col.get(key).and_then(Value::as_str).ok_or_else(|| {
            AddinError::Manifest(format!(
                "Column constraint {} in input_data_types[{}] is missing '{}'",
                col_idx, idx, key
            ))
        })
    };

    let name = field("name")?;
    let type_name = field("type")?;
    let dtype = ScalarType::from_keyword(type_name).ok_or_else(|| {
        AddinError::Manifest(format!(
            "Unrecognized column type '{}' for column '{}'",
            type_name, name
        ))
    })?;

    Ok(ColumnSpec {
        name: name.to_string(),
        dtype,
    })
}

fn parse_metric(item: &Value) -> Result<MetricSpec> {
    let name = item
        .as_mapping()
        .and_then(|_| item.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AddinError::Manifest("Each metric must be a dict with a 'name' field".to_string())
        })?;
    let description = item
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(MetricSpec {
        name: name.to_string(),
        description: description.to_string(),
    })
}
