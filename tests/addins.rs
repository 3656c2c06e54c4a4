//! End-to-end tests over the manifests shipped in `addins/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use promptlab::addins::{
    run_addin_with_logging, AddinRegistry, AddinRunner, EntryPoints, FailureKind, RunOptions,
};
use promptlab::config::{AnalyticsConfig, RunnerConfig};
use promptlab::data::AddinData;
use promptlab::AddinError;

fn shipped_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("addins")
}

fn registry() -> AddinRegistry {
    let mut registry = AddinRegistry::new(Arc::new(EntryPoints::builtin().unwrap()));
    registry.discover_from_manifests(&shipped_dir()).unwrap();
    registry
}

fn experiment() -> AddinData {
    AddinData::from_json(json!([
        {"variant": "concise", "score": 0.82},
        {"variant": "concise", "score": 0.78},
        {"variant": "concise", "score": 0.91},
        {"variant": "verbose", "score": 0.64},
        {"variant": "verbose", "score": 0.70},
        {"variant": "verbose", "score": 0.59},
    ]))
    .unwrap()
}

#[test]
fn shipped_manifests_register_in_file_order() {
    let registry = registry();
    assert!(registry.failures().is_empty(), "{:?}", registry.failures());
    assert_eq!(
        registry.list(),
        vec!["confidence_interval", "descriptive_stats", "effect_size"]
    );
}

#[test]
fn every_shipped_addin_reports_metadata() {
    let registry = registry();
    for name in registry.list() {
        let meta = registry.describe(name).unwrap().unwrap();
        assert!(!meta.metrics.is_empty(), "{} has no metrics", name);
    }
}

#[test]
fn run_shipped_addins_over_experiment() {
    let registry = registry();
    let runner = AddinRunner::default();
    let data = experiment();

    let stats = registry.instantiate("descriptive_stats").unwrap();
    let out = runner.run_loaded(&stats, &data, &RunOptions::new()).unwrap();
    assert_eq!(out["score"]["count"], 6);

    let ci = registry.instantiate("confidence_interval").unwrap();
    let out = runner.run_loaded(&ci, &data, &RunOptions::new()).unwrap();
    assert!(out["lower"].as_f64().unwrap() < out["upper"].as_f64().unwrap());

    let effect = registry.instantiate("effect_size").unwrap();
    let options = RunOptions::new()
        .with("group_a", "concise")
        .with("group_b", "verbose");
    let out = runner.run_loaded(&effect, &data, &options).unwrap();
    assert!(out["cohen_d"].as_f64().unwrap() > 0.0);
}

#[test]
fn batch_over_shipped_addins_keeps_going_after_failures() {
    let registry = registry();
    let loaded: Vec<_> = registry
        .list()
        .into_iter()
        .map(|name| registry.instantiate(name).unwrap())
        .collect();

    // No `variant` column: effect_size fails validation, the others succeed.
    let data = AddinData::from_json(json!([{"score": 0.5}, {"score": 0.7}])).unwrap();
    let outcomes = AddinRunner::default().run_batch(&loaded, &data, &RunOptions::new());

    assert_eq!(outcomes.len(), 3);
    let (name, failed) = &outcomes[2];
    assert_eq!(name, "effect_size");
    assert_eq!(failed.as_ref().unwrap_err().kind, FailureKind::Validation);
    assert!(outcomes[0].1.is_ok());
    assert!(outcomes[1].1.is_ok());
}

#[test]
fn data_without_score_is_rejected_before_running() {
    let registry = registry();
    let ci = registry.instantiate("confidence_interval").unwrap();
    let data = AddinData::from_json(json!([{"latency": 120}])).unwrap();

    let err = AddinRunner::default()
        .run_loaded(&ci, &data, &RunOptions::new())
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Validation);
    assert_eq!(err.version.as_deref(), Some("1.0.0"));
    assert!(err.message.contains("score"));
}

#[test]
fn empty_values_reach_the_addin() {
    let registry = registry();
    let ci = registry.instantiate("confidence_interval").unwrap();
    let data = AddinData::from_json(json!({"values": []})).unwrap();

    let err = AddinRunner::default()
        .run_loaded(&ci, &data, &RunOptions::new())
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Validation);
    assert!(err.message.contains("Values cannot be empty"), "{}", err.message);
}

#[test]
fn disabled_metric_category_is_not_run() {
    let config = AnalyticsConfig::from_yaml(
        "metrics:\n  statistical:\n    enabled: false\n  aggregate:\n    enabled: true\n",
    )
    .unwrap();
    let mut registry = AddinRegistry::with_config(
        Arc::new(EntryPoints::builtin().unwrap()),
        config.addins.clone(),
    )
    .with_disabled_categories(config.disabled_metric_categories());
    assert_eq!(registry.discover_from_manifests(&shipped_dir()).unwrap(), 1);
    assert_eq!(registry.list(), vec!["descriptive_stats"]);
    assert_eq!(registry.failures().len(), 2);
    assert!(matches!(
        registry.instantiate("confidence_interval"),
        Err(AddinError::NotFound(_))
    ));

    let loaded: Vec<_> = registry
        .list()
        .into_iter()
        .map(|name| registry.instantiate(name).unwrap())
        .collect();
    let outcomes = AddinRunner::default().run_batch(&loaded, &experiment(), &RunOptions::new());
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, "descriptive_stats");
}

#[test]
fn free_runner_function_isolates_failures() {
    let registry = registry();
    let stats = registry.instantiate("descriptive_stats").unwrap();

    let err = run_addin_with_logging(
        stats.instance.as_ref(),
        &AddinData::List(vec![json!(1)]),
        &RunOptions::new(),
    )
    .unwrap_err();
    assert_eq!(err.addin, "DescriptiveStats");
    assert_eq!(err.kind, FailureKind::Validation);
}

#[test]
fn copied_and_broken_manifests_alongside_shipped_ones() {
    let dir = TempDir::new().unwrap();
    for entry in std::fs::read_dir(shipped_dir()).unwrap() {
        let path = entry.unwrap().path();
        std::fs::copy(&path, dir.path().join(path.file_name().unwrap())).unwrap();
    }
    std::fs::write(
        dir.path().join("zz_broken.yaml"),
        "name: broken\nversion: \"0.1.0\"\n",
    )
    .unwrap();
    std::fs::copy(
        shipped_dir().join("effect_size.yaml"),
        dir.path().join("zz_effect_size_copy.yml"),
    )
    .unwrap();

    let mut registry = AddinRegistry::new(Arc::new(EntryPoints::builtin().unwrap()));
    assert_eq!(registry.discover_from_manifests(dir.path()).unwrap(), 3);
    assert_eq!(registry.failures().len(), 2);
    assert!(matches!(registry.failures()[0].error, AddinError::Manifest(_)));
    assert!(matches!(
        registry.failures()[1].error,
        AddinError::Duplicate { .. }
    ));
    assert!(matches!(
        registry.get("nonexistent"),
        Err(AddinError::NotFound(_))
    ));
}

#[tokio::test]
async fn timed_run_of_shipped_addin() {
    let registry = registry();
    let runner = AddinRunner::new(RunnerConfig {
        timeout_secs: Some(5),
        ..RunnerConfig::default()
    })
    .with_timeout(Duration::from_secs(5));

    let ci = registry.instantiate("confidence_interval").unwrap();
    let options = RunOptions::new().with("confidence_level", 0.9);
    let out = runner
        .run_timed(ci, Arc::new(experiment()), options)
        .await
        .unwrap();
    assert_eq!(out["confidence_level"], 0.9);
}
