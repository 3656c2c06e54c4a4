//! Add-in types for PromptLab
//!
//! This module defines the validated manifest record and its parts: input
//! data descriptors, column constraints, metric descriptors and dependency
//! constraints. A [`Manifest`] can only be produced by
//! [`validate_manifest`](super::manifest::validate_manifest), so every value
//! of the type has passed the field-level checks.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use serde::Serialize;

use crate::data::{ContainerKind, ScalarType};
use crate::error::AddinError;

static DEPENDENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9_.\-]*)\s*(==|!=|>=|<=|~=|>|<)\s*([0-9][0-9A-Za-z.\-+]*)\s*$")
        .expect("dependency pattern is valid")
});

/// A validated, immutable add-in manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) author: String,
    pub(crate) description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) category: Option<String>,
    pub(crate) input_data_types: Vec<InputDataType>,
    pub(crate) metrics: Vec<MetricSpec>,
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) entry_point: String,
}

impl Manifest {
    /// Unique add-in name, the registry key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version string exactly as written in the manifest.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Metric category (`statistical`, `aggregate`, ...) the add-in reports
    /// under, if declared.
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn input_data_types(&self) -> &[InputDataType] {
        &self.input_data_types
    }

    /// Documented metrics. Not enforced at runtime.
    pub fn metrics(&self) -> &[MetricSpec] {
        &self.metrics
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// `module.Name` reference to the implementing add-in class.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

/// One accepted input shape: a container type, optionally refined by
/// column constraints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputDataType {
    pub kind: ContainerKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnSpec>,
}

impl InputDataType {
    pub fn is_column_constrained(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// A required column and its expected scalar type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub dtype: ScalarType,
}

/// A metric the add-in documents that it computes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Version comparison operator of a dependency constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    /// `~=`: at least the given version, within the same release series.
    Compatible,
}

impl Comparator {
    fn from_operator(op: &str) -> Option<Self> {
        match op {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            "~=" => Some(Self::Compatible),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Compatible => "~=",
        }
    }
}

/// A `package<comparator><version>` constraint, e.g. `promptlab>=0.3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub package: String,
    pub comparator: Comparator,
    pub version: Version,
    /// Number of release components written (`1.3` -> 2).
    release_parts: usize,
}

impl Dependency {
    /// Whether `installed` satisfies this constraint.
    pub fn matches(&self, installed: &Version) -> bool {
        match self.comparator {
            Comparator::Eq => installed == &self.version,
            Comparator::Ne => installed != &self.version,
            Comparator::Ge => installed >= &self.version,
            Comparator::Le => installed <= &self.version,
            Comparator::Gt => installed > &self.version,
            Comparator::Lt => installed < &self.version,
            Comparator::Compatible => {
                if installed < &self.version {
                    return false;
                }
                match self.release_parts {
                    0..=2 => installed.major == self.version.major,
                    _ => {
                        installed.major == self.version.major
                            && installed.minor == self.version.minor
                    }
                }
            }
        }
    }
}

impl FromStr for Dependency {
    type Err = AddinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DEPENDENCY_RE.captures(s).ok_or_else(|| {
            AddinError::Manifest(format!(
                "Invalid dependency constraint '{}': expected package<comparator><version>",
                s
            ))
        })?;

        let comparator = Comparator::from_operator(&caps[2]).ok_or_else(|| {
            AddinError::Manifest(format!("Unknown comparator '{}' in '{}'", &caps[2], s))
        })?;
        let (version, release_parts) = parse_lenient_version(&caps[3]).map_err(|e| {
            AddinError::Manifest(format!("Invalid version in dependency '{}': {}", s, e))
        })?;

        Ok(Self {
            package: caps[1].to_string(),
            comparator,
            version,
            release_parts,
        })
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.package, self.comparator.as_str(), self.version)
    }
}

impl Serialize for Dependency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse `1`, `1.3` or `1.3.0` (optionally with `-pre`/`+build`) into a
/// full semantic version, returning it with the number of release
/// components that were written.
pub fn parse_lenient_version(raw: &str) -> Result<(Version, usize), semver::Error> {
    let raw = raw.trim();
    let split_at = raw.find(|c: char| c == '-' || c == '+').unwrap_or(raw.len());
    let (release, suffix) = raw.split_at(split_at);
    let parts = release.split('.').filter(|p| !p.is_empty()).count();

    let padded = match parts {
        1 => format!("{}.0.0{}", release, suffix),
        2 => format!("{}.0{}", release, suffix),
        _ => raw.to_string(),
    };
    Version::parse(&padded).map(|v| (v, parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_parse() {
        let dep: Dependency = "pandas>=1.3.0".parse().unwrap();
        assert_eq!(dep.package, "pandas");
        assert_eq!(dep.comparator, Comparator::Ge);
        assert_eq!(dep.version, Version::new(1, 3, 0));
        assert_eq!(dep.to_string(), "pandas>=1.3.0");
    }

    #[test]
    fn test_dependency_parse_lenient_version_and_spaces() {
        let dep: Dependency = "scipy >= 1.7".parse().unwrap();
        assert_eq!(dep.package, "scipy");
        assert_eq!(dep.version, Version::new(1, 7, 0));
    }

    #[test]
    fn test_dependency_parse_rejects_garbage() {
        for bad in ["pandas", ">=1.0", "pandas=>1.0", "pandas>=", "pandas>=abc", ""] {
            let result: Result<Dependency, _> = bad.parse();
            assert!(result.is_err(), "expected '{}' to be rejected", bad);
        }
    }

    #[test]
    fn test_dependency_matches_operators() {
        let v = Version::new(1, 4, 2);
        assert!("x>=1.4".parse::<Dependency>().unwrap().matches(&v));
        assert!(!"x>1.4.2".parse::<Dependency>().unwrap().matches(&v));
        assert!("x<2".parse::<Dependency>().unwrap().matches(&v));
        assert!("x<=1.4.2".parse::<Dependency>().unwrap().matches(&v));
        assert!("x==1.4.2".parse::<Dependency>().unwrap().matches(&v));
        assert!("x!=1.4.1".parse::<Dependency>().unwrap().matches(&v));
    }

    #[test]
    fn test_dependency_compatible_release() {
        let two_part: Dependency = "x~=1.4".parse().unwrap();
        assert!(two_part.matches(&Version::new(1, 9, 0)));
        assert!(!two_part.matches(&Version::new(2, 0, 0)));
        assert!(!two_part.matches(&Version::new(1, 3, 9)));

        let three_part: Dependency = "x~=1.4.2".parse().unwrap();
        assert!(three_part.matches(&Version::new(1, 4, 7)));
        assert!(!three_part.matches(&Version::new(1, 5, 0)));
    }

    #[test]
    fn test_parse_lenient_version() {
        assert_eq!(parse_lenient_version("2").unwrap(), (Version::new(2, 0, 0), 1));
        assert_eq!(parse_lenient_version("0.1").unwrap().0, Version::new(0, 1, 0));
        let (pre, parts) = parse_lenient_version("1.0-rc.1").unwrap();
        assert_eq!(parts, 2);
        assert_eq!(pre.to_string(), "1.0.0-rc.1");
        assert!(parse_lenient_version("one.two").is_err());
    }
}
