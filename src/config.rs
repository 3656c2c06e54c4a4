//! Configuration for PromptLab analytics add-ins.
//!
//! Loaded from a YAML file (`~/.promptlab/config.yaml` unless a path is
//! given), then overridden from the environment:
//!
//! | Variable                        | Field                          |
//! |---------------------------------|--------------------------------|
//! | `PROMPTLAB_ADDIN_DIRS`          | `addins.dirs` (`:` or `,` separated) |
//! | `PROMPTLAB_ADDIN_TIMEOUT_SECS`  | `runner.timeout_secs`          |
//! | `PROMPTLAB_STRICT_DEPENDENCIES` | `addins.strict_dependencies`   |

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AddinError, Result};

pub const ENV_ADDIN_DIRS: &str = "PROMPTLAB_ADDIN_DIRS";
pub const ENV_TIMEOUT_SECS: &str = "PROMPTLAB_ADDIN_TIMEOUT_SECS";
pub const ENV_STRICT_DEPENDENCIES: &str = "PROMPTLAB_STRICT_DEPENDENCIES";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Top-level analytics configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub addins: AddinsConfig,
    pub runner: RunnerConfig,
    /// Metric categories keyed by name (`statistical`, `aggregate`, ...).
    pub metrics: BTreeMap<String, MetricCategory>,
}

/// Add-in discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddinsConfig {
    /// Directories scanned for manifest files. `~` expands to the home directory.
    pub dirs: Vec<String>,

    /// Allowlist of add-in names. If empty, all discovered add-ins are allowed.
    pub allowed_addins: Vec<String>,

    /// Blocklist of add-in names. Takes precedence over the allowlist.
    pub blocked_addins: Vec<String>,

    /// Reject dependency constraints on packages the host does not know.
    pub strict_dependencies: bool,
}

impl Default for AddinsConfig {
    fn default() -> Self {
        Self {
            dirs: default_addin_dirs(),
            allowed_addins: Vec::new(),
            blocked_addins: Vec::new(),
            strict_dependencies: false,
        }
    }
}

impl AddinsConfig {
    /// Check whether an add-in name is permitted by the allow/block lists.
    ///
    /// An add-in is permitted if:
    /// - It is not in the blocked list, AND
    /// - The allowed list is empty (all add-ins allowed) OR the add-in is in the allowed list.
    pub fn is_addin_permitted(&self, name: &str) -> bool {
        if self.blocked_addins.iter().any(|b| b == name) {
            return false;
        }
        if self.allowed_addins.is_empty() {
            return true;
        }
        self.allowed_addins.iter().any(|a| a == name)
    }

    /// Configured directories with `~` expanded.
    pub fn resolved_dirs(&self) -> Vec<PathBuf> {
        self.dirs.iter().map(|d| expand_home(d)).collect()
    }
}

/// Runner behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Wall-clock budget per invocation for timed runs. `None` means unbounded.
    pub timeout_secs: Option<u64>,

    /// Maximum characters of payload rendered into failure logs.
    pub payload_preview_chars: usize,

    /// Validate input data against the manifest before each run.
    pub validate_input: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            payload_preview_chars: 256,
            validate_input: true,
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// One metric category toggle. `enabled` is mandatory; any other keys are
/// kept for the add-ins that read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCategory {
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_yaml::Value>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AnalyticsConfig {
    /// Default config file location: `~/.promptlab/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".promptlab").join("config.yaml"))
    }

    /// Load configuration and apply environment overrides.
    ///
    /// With `path = None` the default location is used, and a missing file
    /// yields the defaults. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML config file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AddinError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| AddinError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse a YAML document. An empty document yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides read through `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_ADDIN_DIRS) {
            self.addins.dirs = raw
                .split([':', ','])
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
            debug!(dirs = ?self.addins.dirs, "Add-in dirs overridden from environment");
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                AddinError::Config(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    ENV_TIMEOUT_SECS, raw
                ))
            })?;
            self.runner.timeout_secs = Some(secs);
        }

        if let Some(raw) = lookup(ENV_STRICT_DEPENDENCIES) {
            self.addins.strict_dependencies = parse_bool(&raw).ok_or_else(|| {
                AddinError::Config(format!(
                    "{} must be true or false, got '{}'",
                    ENV_STRICT_DEPENDENCIES, raw
                ))
            })?;
        }

        Ok(())
    }

    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> Result<()> {
        if self.runner.timeout_secs == Some(0) {
            return Err(AddinError::Config(
                "runner.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.runner.payload_preview_chars == 0 {
            return Err(AddinError::Config(
                "runner.payload_preview_chars must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a metric category is switched on. Unknown categories are off.
    pub fn is_metric_enabled(&self, category: &str) -> bool {
        self.metrics.get(category).map_or(false, |m| m.enabled)
    }

    /// Categories listed with `enabled: false`. Add-ins in these categories
    /// are not registered; unlisted categories are left alone.
    pub fn disabled_metric_categories(&self) -> BTreeSet<String> {
        self.metrics
            .iter()
            .filter(|(_, m)| !m.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

/// Returns the default add-in directories.
fn default_addin_dirs() -> Vec<String> {
    vec!["addins".to_string(), "~/.promptlab/addins".to_string()]
}
