//! Runtime data payloads handed to analytics add-ins.
//!
//! Experiment results usually arrive as JSON records (one object per judged
//! response). They are turned into a column-typed [`DataFrame`] so that the
//! input data validator can check declared column types the same way for
//! every add-in.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AddinError, Result};

/// Number of leading rows/items included in a diagnostic preview.
const PREVIEW_ROWS: usize = 5;

/// Container shapes an add-in can declare in `input_data_types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    DataFrame,
    Series,
    List,
    Mapping,
}

impl ContainerKind {
    /// Parse a manifest keyword, case-insensitively.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "dataframe" | "frame" => Some(Self::DataFrame),
            "series" => Some(Self::Series),
            "list" | "array" => Some(Self::List),
            "dict" | "mapping" | "map" => Some(Self::Mapping),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataFrame => write!(f, "DataFrame"),
            Self::Series => write!(f, "Series"),
            Self::List => write!(f, "List"),
            Self::Mapping => write!(f, "Mapping"),
        }
    }
}

/// Scalar element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Float,
    Int,
    Str,
    Bool,
}

impl ScalarType {
    /// Parse a manifest keyword, case-insensitively.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "float" | "float64" | "double" | "number" => Some(Self::Float),
            "int" | "int64" | "integer" => Some(Self::Int),
            "str" | "string" | "text" => Some(Self::Str),
            "bool" | "boolean" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Whether a column of type `self` satisfies a declared type.
    ///
    /// Integers widen to floats; nothing else converts.
    pub fn satisfies(self, declared: ScalarType) -> bool {
        self == declared || (self == Self::Int && declared == Self::Float)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Int => write!(f, "int"),
            Self::Str => write!(f, "str"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// Homogeneously typed column storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Str(Vec<String>),
    Bool(Vec<bool>),
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

impl Column {
    pub fn new(name: impl Into<String>, values: ColumnValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn dtype(&self) -> ScalarType {
        match &self.values {
            ColumnValues::Float(_) => ScalarType::Float,
            ColumnValues::Int(_) => ScalarType::Int,
            ColumnValues::Str(_) => ScalarType::Str,
            ColumnValues::Bool(_) => ScalarType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match &self.values {
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Int(v) => v.len(),
            ColumnValues::Str(v) => v.len(),
            ColumnValues::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of the column; `None` for text and boolean columns.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match &self.values {
            ColumnValues::Float(v) => Some(v.clone()),
            ColumnValues::Int(v) => Some(v.iter().map(|x| *x as f64).collect()),
            _ => None,
        }
    }

    /// JSON value at row `idx`.
    pub fn value_at(&self, idx: usize) -> Option<Value> {
        match &self.values {
            ColumnValues::Float(v) => v.get(idx).map(|x| Value::from(*x)),
            ColumnValues::Int(v) => v.get(idx).map(|x| Value::from(*x)),
            ColumnValues::Str(v) => v.get(idx).map(|x| Value::from(x.as_str())),
            ColumnValues::Bool(v) => v.get(idx).map(|x| Value::from(*x)),
        }
    }

    /// Build a column from JSON scalars, inferring the narrowest dtype.
    pub fn from_json_values(name: impl Into<String>, values: &[Value]) -> Result<Self> {
        let name = name.into();
        let column_values = if values.iter().all(Value::is_boolean) {
            ColumnValues::Bool(values.iter().filter_map(Value::as_bool).collect())
        } else if values.iter().all(|v| v.is_i64()) {
            ColumnValues::Int(values.iter().filter_map(Value::as_i64).collect())
        } else if values.iter().all(Value::is_number) {
            ColumnValues::Float(values.iter().filter_map(Value::as_f64).collect())
        } else if values.iter().all(Value::is_string) {
            ColumnValues::Str(
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            )
        } else {
            return Err(AddinError::DataValidation(format!(
                "Column {} mixes incompatible value types",
                name
            )));
        };
        Ok(Self::new(name, column_values))
    }
}

/// Column-oriented table of experiment results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    columns: Vec<Column>,
}

impl DataFrame {
    /// Build a frame, rejecting duplicate names and ragged columns.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(AddinError::DataValidation(format!(
                    "Duplicate column: {}",
                    column.name
                )));
            }
        }
        if let Some(first) = columns.first() {
            let rows = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != rows) {
                return Err(AddinError::DataValidation(format!(
                    "Column {} has {} rows, expected {}",
                    bad.name,
                    bad.len(),
                    rows
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Build a frame from JSON records (`[{"score": 1.0, ...}, ...]`).
    ///
    /// Columns appear in record key order, first record first. Every record
    /// must carry every column.
    pub fn from_records(records: &[Value]) -> Result<Self> {
        let mut names: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        let mut rows: Vec<&Map<String, Value>> = Vec::with_capacity(records.len());

        for (idx, record) in records.iter().enumerate() {
            let obj = record.as_object().ok_or_else(|| {
                AddinError::DataValidation(format!("Record {} is not an object", idx))
            })?;
            for key in obj.keys() {
                if seen.insert(key.clone()) {
                    names.push(key.clone());
                }
            }
            rows.push(obj);
        }

        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let mut values = Vec::with_capacity(rows.len());
            for (idx, row) in rows.iter().enumerate() {
                let value = row.get(&name).ok_or_else(|| {
                    AddinError::DataValidation(format!(
                        "Record {} is missing column {}",
                        idx, name
                    ))
                })?;
                values.push(value.clone());
            }
            columns.push(Column::from_json_values(name, &values)?);
        }

        Self::new(columns)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows `0..n` rendered as JSON records.
    pub fn head_records(&self, n: usize) -> Vec<Value> {
        (0..self.len().min(n))
            .map(|idx| {
                let mut record = Map::new();
                for column in &self.columns {
                    if let Some(v) = column.value_at(idx) {
                        record.insert(column.name.clone(), v);
                    }
                }
                Value::Object(record)
            })
            .collect()
    }
}

/// The payload an add-in runs against.
#[derive(Debug, Clone, PartialEq)]
pub enum AddinData {
    DataFrame(DataFrame),
    Series(Column),
    List(Vec<Value>),
    Mapping(Map<String, Value>),
}

impl AddinData {
    /// Map a JSON document to a payload.
    ///
    /// A non-empty array of objects becomes a frame, any other array a list,
    /// an object a mapping.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                Ok(Self::DataFrame(DataFrame::from_records(&items)?))
            }
            Value::Array(items) => Ok(Self::List(items)),
            Value::Object(map) => Ok(Self::Mapping(map)),
            other => Err(AddinError::DataValidation(format!(
                "Unsupported top-level JSON value for add-in data: {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn kind(&self) -> ContainerKind {
        match self {
            Self::DataFrame(_) => ContainerKind::DataFrame,
            Self::Series(_) => ContainerKind::Series,
            Self::List(_) => ContainerKind::List,
            Self::Mapping(_) => ContainerKind::Mapping,
        }
    }

    pub fn as_frame(&self) -> Option<&DataFrame> {
        match self {
            Self::DataFrame(df) => Some(df),
            _ => None,
        }
    }

    /// Short shape description, e.g. `DataFrame[rows=3, columns=score:float,label:str]`.
    pub fn describe(&self) -> String {
        match self {
            Self::DataFrame(df) => {
                let cols: Vec<String> = df
                    .columns()
                    .iter()
                    .map(|c| format!("{}:{}", c.name, c.dtype()))
                    .collect();
                format!("DataFrame[rows={}, columns={}]", df.len(), cols.join(","))
            }
            Self::Series(col) => format!("Series[{}:{}, len={}]", col.name, col.dtype(), col.len()),
            Self::List(items) => format!("List[len={}]", items.len()),
            Self::Mapping(map) => format!("Mapping[keys={}]", map.len()),
        }
    }

    /// Bounded diagnostic rendering: shape plus a few leading items, cut at
    /// `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> String {
        let head: Value = match self {
            Self::DataFrame(df) => Value::Array(df.head_records(PREVIEW_ROWS)),
            Self::Series(col) => Value::Array(
                (0..col.len().min(PREVIEW_ROWS))
                    .filter_map(|idx| col.value_at(idx))
                    .collect(),
            ),
            Self::List(items) => Value::Array(items.iter().take(PREVIEW_ROWS).cloned().collect()),
            Self::Mapping(map) => Value::Object(
                map.iter()
                    .take(PREVIEW_ROWS)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        };
        truncate_chars(&format!("{} {}", self.describe(), head), max_chars)
    }
}

/// Cut `s` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_records_infers_dtypes() {
        let df = DataFrame::from_records(&[
            json!({"score": 1.5, "count": 1, "label": "a", "ok": true}),
            json!({"score": 2, "count": 2, "label": "b", "ok": false}),
        ])
        .unwrap();

        assert_eq!(df.len(), 2);
        assert_eq!(df.column_names(), vec!["count", "label", "ok", "score"]);
        assert_eq!(df.column("score").unwrap().dtype(), ScalarType::Float);
        assert_eq!(df.column("count").unwrap().dtype(), ScalarType::Int);
        assert_eq!(df.column("label").unwrap().dtype(), ScalarType::Str);
        assert_eq!(df.column("ok").unwrap().dtype(), ScalarType::Bool);
    }

    #[test]
    fn test_from_records_rejects_missing_cell() {
        let err = DataFrame::from_records(&[json!({"score": 1.0}), json!({"label": "x"})])
            .unwrap_err();
        assert!(err.to_string().contains("missing column"));
    }

    #[test]
    fn test_from_records_rejects_mixed_types() {
        let err = DataFrame::from_records(&[json!({"score": 1.0}), json!({"score": "high"})])
            .unwrap_err();
        assert!(err.to_string().contains("mixes incompatible"));
    }

    #[test]
    fn test_new_rejects_ragged_columns() {
        let result = DataFrame::new(vec![
            Column::new("a", ColumnValues::Int(vec![1, 2])),
            Column::new("b", ColumnValues::Int(vec![1])),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_rejects_duplicate_names() {
        let result = DataFrame::new(vec![
            Column::new("a", ColumnValues::Int(vec![1])),
            Column::new("a", ColumnValues::Int(vec![2])),
        ]);
        assert!(result.unwrap_err().to_string().contains("Duplicate column"));
    }

    #[test]
    fn test_from_json_shapes() {
        let frame = AddinData::from_json(json!([{"score": 1.0}])).unwrap();
        assert_eq!(frame.kind(), ContainerKind::DataFrame);

        let list = AddinData::from_json(json!([1, 2, 3])).unwrap();
        assert_eq!(list.kind(), ContainerKind::List);

        let empty = AddinData::from_json(json!([])).unwrap();
        assert_eq!(empty.kind(), ContainerKind::List);

        let mapping = AddinData::from_json(json!({"values": [1, 2]})).unwrap();
        assert_eq!(mapping.kind(), ContainerKind::Mapping);

        assert!(AddinData::from_json(json!(42)).is_err());
    }

    #[test]
    fn test_int_widens_to_float_only() {
        assert!(ScalarType::Int.satisfies(ScalarType::Float));
        assert!(ScalarType::Float.satisfies(ScalarType::Float));
        assert!(!ScalarType::Float.satisfies(ScalarType::Int));
        assert!(!ScalarType::Str.satisfies(ScalarType::Float));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(ContainerKind::from_keyword("dataframe"), Some(ContainerKind::DataFrame));
        assert_eq!(ContainerKind::from_keyword("Dict"), Some(ContainerKind::Mapping));
        assert_eq!(ContainerKind::from_keyword("Tensor"), None);
        assert_eq!(ScalarType::from_keyword("string"), Some(ScalarType::Str));
        assert_eq!(ScalarType::from_keyword("complex"), None);
    }

    #[test]
    fn test_preview_is_bounded() {
        let records: Vec<Value> = (0..1000)
            .map(|i| json!({"score": i as f64, "label": format!("row-{}", i)}))
            .collect();
        let data = AddinData::from_json(Value::Array(records)).unwrap();

        let preview = data.preview(64);
        assert!(preview.starts_with("DataFrame[rows=1000"));
        assert!(preview.chars().count() <= 67);
        assert!(!preview.contains("row-999"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }
}
