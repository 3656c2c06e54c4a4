//! Built-in statistical add-ins shipped with PromptLab.
//!
//! All three are exported under the `promptlab.stats` module of
//! [`EntryPoints::builtin`]. They follow the usual conventions for add-in
//! code: shape problems in the payload are reported as
//! [`AddinError::DataValidation`], everything else as plain `anyhow` errors.

use anyhow::{anyhow, bail};
use serde_json::{json, Map, Value};

use crate::data::{AddinData, Column};
use crate::error::{AddinError, Result};

use super::base::{Addin, AddinMetadata, EntryPoints, FromManifest, RunOptions};
use super::types::Manifest;

/// Module path the built-in add-ins are exported under.
pub const BUILTIN_MODULE: &str = "promptlab.stats";

const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
const DEFAULT_VALUE_COLUMN: &str = "score";
const DEFAULT_GROUP_COLUMN: &str = "variant";

impl EntryPoints {
    /// The table of add-ins compiled into this crate.
    pub fn builtin() -> Result<Self> {
        let mut eps = Self::new();
        eps.register::<DescriptiveStats>(&format!("{}.DescriptiveStats", BUILTIN_MODULE))?;
        eps.register::<ConfidenceInterval>(&format!("{}.ConfidenceInterval", BUILTIN_MODULE))?;
        eps.register::<EffectSize>(&format!("{}.EffectSize", BUILTIN_MODULE))?;
        eps.register_other(
            &format!("{}.normal_quantile", BUILTIN_MODULE),
            "a helper function",
        )?;
        Ok(eps)
    }
}

fn invalid(msg: impl Into<String>) -> anyhow::Error {
    AddinError::DataValidation(msg.into()).into()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator). Requires at least two values.
fn sample_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Inverse of the standard normal CDF (Acklam's rational approximation,
/// relative error below 1.2e-9).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Numeric values of `name` from a frame column, a series, or a mapping entry.
fn numeric_values(data: &AddinData, name: &str) -> anyhow::Result<Vec<f64>> {
    let column = match data {
        AddinData::DataFrame(df) => df
            .column(name)
            .cloned()
            .ok_or_else(|| invalid(format!("Missing required column: {}", name)))?,
        AddinData::Series(col) => col.clone(),
        AddinData::Mapping(map) => match map.get(name) {
            Some(Value::Array(items)) => Column::from_json_values(name, items)?,
            _ => return Err(invalid(format!("Mapping has no '{}' list", name))),
        },
        AddinData::List(items) => Column::from_json_values(name, items)?,
    };
    if column.is_empty() {
        return Ok(Vec::new());
    }
    column
        .to_f64()
        .ok_or_else(|| invalid(format!("Column {} is not numeric", name)))
}

// ---------------------------------------------------------------------------
// DescriptiveStats
// ---------------------------------------------------------------------------

/// Count, mean, sample standard deviation, min and max per numeric column.
///
/// Options: `columns` restricts the summary to the named columns.
#[derive(Debug, Default)]
pub struct DescriptiveStats;

impl Addin for DescriptiveStats {
    fn run(&self, data: &AddinData, options: &RunOptions) -> anyhow::Result<Value> {
        let df = data
            .as_frame()
            .ok_or_else(|| invalid(format!("DescriptiveStats needs a DataFrame, got {}", data.kind())))?;

        let selected: Vec<&Column> = match options.get_str_list("columns") {
            Some(names) => names
                .iter()
                .map(|n| {
                    df.column(n)
                        .ok_or_else(|| invalid(format!("Missing required column: {}", n)))
                })
                .collect::<anyhow::Result<_>>()?,
            None => df
                .columns()
                .iter()
                .filter(|c| c.to_f64().is_some())
                .collect(),
        };

        if selected.is_empty() {
            return Err(invalid("No numeric columns to summarize"));
        }

        let mut summary = Map::new();
        for column in selected {
            let values = column
                .to_f64()
                .ok_or_else(|| invalid(format!("Column {} is not numeric", column.name)))?;
            let stats = if values.is_empty() {
                json!({ "count": 0 })
            } else {
                let std = if values.len() > 1 {
                    json!(sample_variance(&values).sqrt())
                } else {
                    Value::Null
                };
                json!({
                    "count": values.len(),
                    "mean": mean(&values),
                    "std": std,
                    "min": values.iter().copied().fold(f64::INFINITY, f64::min),
                    "max": values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                })
            };
            summary.insert(column.name.clone(), stats);
        }
        Ok(Value::Object(summary))
    }

    fn metadata(&self) -> Option<AddinMetadata> {
        Some(AddinMetadata {
            name: "DescriptiveStats".to_string(),
            description: "Summary statistics for numeric result columns".to_string(),
            metrics: vec![
                "count".to_string(),
                "mean".to_string(),
                "std".to_string(),
                "min".to_string(),
                "max".to_string(),
            ],
        })
    }
}

impl FromManifest for DescriptiveStats {
    fn from_manifest(_manifest: &Manifest) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

// ---------------------------------------------------------------------------
// ConfidenceInterval
// ---------------------------------------------------------------------------

/// Normal-approximation confidence interval around a column mean.
///
/// Options: `column` (default `score`, `values` for mappings),
/// `confidence_level` (default 0.95).
#[derive(Debug)]
pub struct ConfidenceInterval {
    confidence_level: f64,
}

impl Default for ConfidenceInterval {
    fn default() -> Self {
        Self {
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        }
    }
}

impl Addin for ConfidenceInterval {
    fn run(&self, data: &AddinData, options: &RunOptions) -> anyhow::Result<Value> {
        let level = options
            .get_f64("confidence_level")
            .unwrap_or(self.confidence_level);
        if !(level > 0.0 && level < 1.0) {
            bail!("confidence_level must be between 0 and 1, got {}", level);
        }

        let default_column = match data {
            AddinData::Mapping(_) => "values",
            _ => DEFAULT_VALUE_COLUMN,
        };
        let column = options.get_str("column").unwrap_or(default_column);
        let values = numeric_values(data, column)?;
        if values.is_empty() {
            return Err(invalid("Values cannot be empty."));
        }
        if values.len() < 2 {
            return Err(invalid("At least two values are needed for an interval"));
        }

        let m = mean(&values);
        let std_err = sample_variance(&values).sqrt() / (values.len() as f64).sqrt();
        let z = normal_quantile(1.0 - (1.0 - level) / 2.0);
        let margin = z * std_err;

        Ok(json!({
            "column": column,
            "confidence_level": level,
            "mean": m,
            "lower": m - margin,
            "upper": m + margin,
        }))
    }

    fn metadata(&self) -> Option<AddinMetadata> {
        Some(AddinMetadata {
            name: "ConfidenceInterval".to_string(),
            description: "Confidence interval of the mean".to_string(),
            metrics: vec!["mean".to_string(), "lower".to_string(), "upper".to_string()],
        })
    }
}

impl FromManifest for ConfidenceInterval {
    fn from_manifest(_manifest: &Manifest) -> anyhow::Result<Self> {
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// EffectSize
// ---------------------------------------------------------------------------

/// Cohen's d and Hedges' g between two groups.
///
/// Frames are split by `group_column` (default `variant`) into `group_a` and
/// `group_b` (default: the first two distinct labels) over `value_column`
/// (default `score`). Mappings supply `group1` and `group2` lists directly.
#[derive(Debug, Default)]
pub struct EffectSize;

impl EffectSize {
    fn groups(data: &AddinData, options: &RunOptions) -> anyhow::Result<(Vec<f64>, Vec<f64>)> {
        match data {
            AddinData::Mapping(_) => Ok((
                numeric_values(data, "group1")?,
                numeric_values(data, "group2")?,
            )),
            AddinData::DataFrame(df) => {
                let group_column = options.get_str("group_column").unwrap_or(DEFAULT_GROUP_COLUMN);
                let value_column = options.get_str("value_column").unwrap_or(DEFAULT_VALUE_COLUMN);

                let labels = df
                    .column(group_column)
                    .ok_or_else(|| invalid(format!("Missing required column: {}", group_column)))?;
                let labels: Vec<String> = (0..labels.len())
                    .filter_map(|i| labels.value_at(i))
                    .map(|v| match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect();
                let values = numeric_values(data, value_column)?;

                let mut distinct: Vec<&str> = Vec::new();
                for label in &labels {
                    if !distinct.contains(&label.as_str()) {
                        distinct.push(label);
                    }
                }
                let group_a = options
                    .get_str("group_a")
                    .or_else(|| distinct.first().copied())
                    .ok_or_else(|| invalid("No groups found"))?;
                let group_b = options
                    .get_str("group_b")
                    .or_else(|| distinct.get(1).copied())
                    .ok_or_else(|| invalid("Need two groups to compare"))?;

                let pick = |wanted: &str| -> Vec<f64> {
                    labels
                        .iter()
                        .zip(&values)
                        .filter(|(label, _)| label.as_str() == wanted)
                        .map(|(_, v)| *v)
                        .collect()
                };
                Ok((pick(group_a), pick(group_b)))
            }
            other => Err(invalid(format!(
                "EffectSize needs a DataFrame or Mapping, got {}",
                other.kind()
            ))),
        }
    }
}

impl Addin for EffectSize {
    fn run(&self, data: &AddinData, options: &RunOptions) -> anyhow::Result<Value> {
        let (a, b) = Self::groups(data, options)?;
        if a.len() < 2 || b.len() < 2 {
            return Err(invalid(format!(
                "Each group needs at least two values (got {} and {})",
                a.len(),
                b.len()
            )));
        }

        let (n1, n2) = (a.len() as f64, b.len() as f64);
        let pooled = (((n1 - 1.0) * sample_variance(&a) + (n2 - 1.0) * sample_variance(&b))
            / (n1 + n2 - 2.0))
            .sqrt();
        if pooled == 0.0 {
            return Err(anyhow!("Pooled standard deviation is zero; effect size undefined"));
        }

        let cohen_d = (mean(&a) - mean(&b)) / pooled;
        let hedges_g = cohen_d * (1.0 - 3.0 / (4.0 * (n1 + n2) - 9.0));

        Ok(json!({
            "cohen_d": cohen_d,
            "hedges_g": hedges_g,
            "n1": a.len(),
            "n2": b.len(),
        }))
    }

    fn metadata(&self) -> Option<AddinMetadata> {
        Some(AddinMetadata {
            name: "EffectSize".to_string(),
            description: "Standardized mean difference between two groups".to_string(),
            metrics: vec!["cohen_d".to_string(), "hedges_g".to_string()],
        })
    }
}

impl FromManifest for EffectSize {
    fn from_manifest(_manifest: &Manifest) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(records: Value) -> AddinData {
        AddinData::from_json(records).unwrap()
    }

    fn is_validation(err: &anyhow::Error) -> bool {
        err.downcast_ref::<AddinError>()
            .map_or(false, AddinError::is_validation)
    }

    #[test]
    fn test_normal_quantile_known_values() {
        assert!((normal_quantile(0.975) - 1.959_964).abs() < 1e-5);
        assert!((normal_quantile(0.5)).abs() < 1e-9);
        assert!((normal_quantile(0.005) + 2.575_829).abs() < 1e-5);
        assert!(normal_quantile(0.0).is_infinite());
    }

    #[test]
    fn test_builtin_table_resolves() {
        let eps = EntryPoints::builtin().unwrap();
        assert!(eps.resolve("promptlab.stats.DescriptiveStats").is_ok());
        assert!(eps.resolve("promptlab.stats.ConfidenceInterval").is_ok());
        assert!(eps.resolve("promptlab.stats.EffectSize").is_ok());
        assert!(matches!(
            eps.resolve("promptlab.stats.normal_quantile"),
            Err(AddinError::Contract(_))
        ));
        assert_eq!(
            eps.paths(),
            vec![
                "promptlab.stats.ConfidenceInterval",
                "promptlab.stats.DescriptiveStats",
                "promptlab.stats.EffectSize",
                "promptlab.stats.normal_quantile",
            ]
        );
    }

    #[test]
    fn test_descriptive_stats() {
        let data = frame(json!([
            {"score": 1.0, "latency": 10, "label": "a"},
            {"score": 2.0, "latency": 20, "label": "b"},
            {"score": 3.0, "latency": 30, "label": "c"},
        ]));
        let out = DescriptiveStats.run(&data, &RunOptions::new()).unwrap();

        assert_eq!(out["score"]["count"], 3);
        assert_eq!(out["score"]["mean"], 2.0);
        assert_eq!(out["score"]["std"], 1.0);
        assert_eq!(out["latency"]["max"], 30.0);
        assert!(out.get("label").is_none());
    }

    #[test]
    fn test_descriptive_stats_selected_columns() {
        let data = frame(json!([{"score": 1.0, "latency": 3}]));
        let options = RunOptions::new().with("columns", "latency");
        let out = DescriptiveStats.run(&data, &options).unwrap();
        assert!(out.get("score").is_none());
        assert_eq!(out["latency"]["count"], 1);
        assert!(out["latency"]["std"].is_null());

        let bad = RunOptions::new().with("columns", "missing");
        let err = DescriptiveStats.run(&data, &bad).unwrap_err();
        assert!(is_validation(&err));
    }

    #[test]
    fn test_descriptive_stats_rejects_non_frame() {
        let err = DescriptiveStats
            .run(&AddinData::List(vec![json!(1)]), &RunOptions::new())
            .unwrap_err();
        assert!(is_validation(&err));
    }

    #[test]
    fn test_confidence_interval() {
        let data = frame(json!([{"score": 1.0}, {"score": 2.0}, {"score": 3.0}, {"score": 4.0}]));
        let out = ConfidenceInterval::default()
            .run(&data, &RunOptions::new())
            .unwrap();

        let m = out["mean"].as_f64().unwrap();
        let lower = out["lower"].as_f64().unwrap();
        let upper = out["upper"].as_f64().unwrap();
        assert_eq!(m, 2.5);
        assert!(lower < m && m < upper);
        assert!(((upper - m) - (m - lower)).abs() < 1e-12);
        // sd = 1.2910, se = 0.6455, z = 1.96
        assert!((upper - m - 1.265_2).abs() < 1e-3);
    }

    #[test]
    fn test_confidence_interval_mapping_values() {
        let data = frame(json!({"values": [10, 12, 14]}));
        let options = RunOptions::new().with("confidence_level", 0.99);
        let out = ConfidenceInterval::default().run(&data, &options).unwrap();
        assert_eq!(out["mean"], 12.0);
        assert_eq!(out["confidence_level"], 0.99);
    }

    #[test]
    fn test_confidence_interval_errors() {
        let empty = frame(json!({"values": []}));
        let err = ConfidenceInterval::default()
            .run(&empty, &RunOptions::new())
            .unwrap_err();
        assert!(err.to_string().contains("Values cannot be empty"));

        let data = frame(json!([{"score": 1.0}, {"score": 2.0}]));
        let bad_level = RunOptions::new().with("confidence_level", 1.5);
        let err = ConfidenceInterval::default()
            .run(&data, &bad_level)
            .unwrap_err();
        assert!(!is_validation(&err));
    }

    #[test]
    fn test_effect_size_from_frame() {
        let data = frame(json!([
            {"variant": "a", "score": 4.0},
            {"variant": "a", "score": 5.0},
            {"variant": "a", "score": 6.0},
            {"variant": "b", "score": 1.0},
            {"variant": "b", "score": 2.0},
            {"variant": "b", "score": 3.0},
        ]));
        let out = EffectSize.run(&data, &RunOptions::new()).unwrap();
        // Both groups have sd 1, means differ by 3.
        assert!((out["cohen_d"].as_f64().unwrap() - 3.0).abs() < 1e-12);
        let g = out["hedges_g"].as_f64().unwrap();
        assert!((g - 3.0 * (1.0 - 3.0 / 15.0)).abs() < 1e-12);

        let swapped = RunOptions::new().with("group_a", "b").with("group_b", "a");
        let out = EffectSize.run(&data, &swapped).unwrap();
        assert!((out["cohen_d"].as_f64().unwrap() + 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_effect_size_from_mapping() {
        let data = frame(json!({"group1": [2.0, 4.0], "group2": [1.0, 3.0]}));
        let out = EffectSize.run(&data, &RunOptions::new()).unwrap();
        assert!(out["cohen_d"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_effect_size_needs_two_groups() {
        let data = frame(json!([{"variant": "a", "score": 1.0}, {"variant": "a", "score": 2.0}]));
        let err = EffectSize.run(&data, &RunOptions::new()).unwrap_err();
        assert!(is_validation(&err));
    }
}
