//! Add-in command handlers (list, validate, check-data, run).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::debug;

use promptlab::addins::registry::manifest_files;
use promptlab::addins::{
    validate_input_data, validate_manifest, AddinRegistry, AddinRunner, EntryPoints, RunOptions,
};
use promptlab::config::AnalyticsConfig;
use promptlab::data::AddinData;

pub(crate) fn load_config(path: Option<&Path>) -> Result<AnalyticsConfig> {
    AnalyticsConfig::load(path).with_context(|| "Failed to load configuration")
}

/// Build a registry over the builtin entry points, scanning `dirs` if given
/// and the configured directories otherwise. Add-ins in disabled metric
/// categories are skipped.
fn build_registry(config: &AnalyticsConfig, dirs: &[PathBuf]) -> Result<AddinRegistry> {
    let entry_points = EntryPoints::builtin().with_context(|| "Failed to build entry point table")?;
    let mut registry = AddinRegistry::with_config(Arc::new(entry_points), config.addins.clone())
        .with_disabled_categories(config.disabled_metric_categories());

    let dirs = if dirs.is_empty() {
        config.addins.resolved_dirs()
    } else {
        dirs.to_vec()
    };
    registry
        .discover_all(&dirs)
        .with_context(|| "Failed to scan add-in directories")?;
    debug!(count = registry.len(), "Registry ready");
    Ok(registry)
}

fn load_data(path: &Path) -> Result<AddinData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    AddinData::from_json(value).with_context(|| format!("Unsupported data in {}", path.display()))
}

/// List registered add-ins.
pub(crate) fn cmd_list(config: &AnalyticsConfig, dirs: &[PathBuf], json: bool) -> Result<()> {
    let registry = build_registry(config, dirs)?;

    if json {
        let manifests: Vec<_> = registry.entries().iter().map(|e| e.manifest.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&manifests)?);
    } else if registry.is_empty() {
        println!("No add-ins registered.");
    } else {
        println!("{:<24} {:<10} {}", "NAME", "VERSION", "ENTRY POINT");
        for entry in registry.entries() {
            println!(
                "{:<24} {:<10} {}",
                entry.name(),
                entry.manifest.version(),
                entry.manifest.entry_point()
            );
        }
    }

    for failure in registry.failures() {
        eprintln!("skipped {}: {}", failure.path.display(), failure.error);
    }
    Ok(())
}

/// Print every path the builtin entry point table exports.
pub(crate) fn cmd_entry_points() -> Result<()> {
    let entry_points = EntryPoints::builtin().with_context(|| "Failed to build entry point table")?;
    for path in entry_points.paths() {
        println!("{}", path);
    }
    Ok(())
}

/// Validate manifest files without resolving entry points.
pub(crate) fn cmd_validate(paths: &[PathBuf]) -> Result<()> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(manifest_files(path)?);
        } else {
            files.push(path.clone());
        }
    }

    let mut failed = 0;
    for file in &files {
        match validate_manifest(file.as_path()) {
            Ok(manifest) => println!(
                "ok      {} ({} {})",
                file.display(),
                manifest.name(),
                manifest.version()
            ),
            Err(e) => {
                failed += 1;
                println!("invalid {}: {}", file.display(), e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} manifests failed validation", failed, files.len());
    }
    Ok(())
}

/// Check a data file against an add-in's input contract.
pub(crate) fn cmd_check_data(
    config: &AnalyticsConfig,
    dirs: &[PathBuf],
    name: &str,
    data_path: &Path,
) -> Result<()> {
    let registry = build_registry(config, dirs)?;
    let entry = registry.entry(name)?;
    let data = load_data(data_path)?;

    validate_input_data(&data, &entry.manifest)?;
    println!("{} accepts {}", name, data.describe());
    Ok(())
}

/// Run an add-in and print its JSON result.
pub(crate) async fn cmd_run(
    config: &AnalyticsConfig,
    dirs: &[PathBuf],
    name: &str,
    data_path: &Path,
    opts: &[String],
    timeout: Option<u64>,
) -> Result<()> {
    let registry = build_registry(config, dirs)?;
    let loaded = registry.instantiate(name)?;
    let data = Arc::new(load_data(data_path)?);

    let mut options = RunOptions::new();
    for pair in opts {
        options.insert_pair(pair)?;
    }

    let mut runner = AddinRunner::new(config.runner.clone());
    if let Some(secs) = timeout {
        runner = runner.with_timeout(Duration::from_secs(secs));
    }

    match runner.run_timed(loaded, data, options).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", serde_json::to_string_pretty(&e)?);
            Err(e.into())
        }
    }
}
