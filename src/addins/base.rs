//! The add-in contract and the compiled-in entry point table.
//!
//! Every analytics add-in implements [`Addin`]. Because nothing is loaded
//! from disk at runtime, a manifest's `entry_point` is resolved against an
//! [`EntryPoints`] table that the host fills in at startup. This is a
//! deliberate capability boundary: a manifest can only select among classes
//! the host binary already contains.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::AddinData;
use crate::error::{AddinError, Result};

use super::types::Manifest;

/// The capability every analytics add-in exposes.
///
/// `run` receives the payload by shared reference; add-ins never mutate
/// their input.
pub trait Addin: Send + Sync {
    /// Compute the add-in's result over `data`.
    fn run(&self, data: &AddinData, options: &RunOptions) -> anyhow::Result<Value>;

    /// Optional descriptive information used for registry introspection.
    fn metadata(&self) -> Option<AddinMetadata> {
        None
    }
}

/// Construction of an add-in from its validated manifest.
pub trait FromManifest: Addin + Sized + 'static {
    fn from_manifest(manifest: &Manifest) -> anyhow::Result<Self>;
}

/// Descriptive information an add-in may report about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddinMetadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub metrics: Vec<String>,
}

/// Keyword options passed to [`Addin::run`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunOptions(Map<String, Value>);

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Parse a `key=value` pair; the value is read as JSON when possible and
    /// as a plain string otherwise.
    pub fn insert_pair(&mut self, pair: &str) -> Result<()> {
        let (key, raw) = pair.split_once('=').ok_or_else(|| {
            AddinError::Config(format!("Option '{}' must look like key=value", pair))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(AddinError::Config(format!("Option '{}' has an empty key", pair)));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
        self.0.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// A list of strings, accepting either a JSON array or a comma-separated string.
    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.0.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

type Factory = dyn Fn(&Manifest) -> anyhow::Result<Box<dyn Addin>> + Send + Sync;

/// A loadable add-in implementation: the "class" a manifest points at.
///
/// Cheap to clone; registries store classes, not instances.
#[derive(Clone)]
pub struct AddinClass {
    type_name: &'static str,
    factory: Arc<Factory>,
}

impl AddinClass {
    /// The class of a concrete add-in type.
    pub fn of<T: FromManifest>() -> Self {
        let factory: Arc<Factory> = Arc::new(|manifest: &Manifest| {
            let addin: Box<dyn Addin> = Box::new(T::from_manifest(manifest)?);
            Ok(addin)
        });
        Self {
            type_name: std::any::type_name::<T>(),
            factory,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Create a fresh instance for `manifest`.
    pub fn instantiate(&self, manifest: &Manifest) -> Result<Arc<dyn Addin>> {
        (self.factory)(manifest).map(Arc::from).map_err(|e| {
            AddinError::Contract(format!(
                "{} could not be constructed for add-in '{}': {:#}",
                self.type_name,
                manifest.name(),
                e
            ))
        })
    }
}

impl fmt::Debug for AddinClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddinClass")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Something exported under an entry point path.
#[derive(Debug, Clone)]
pub enum Symbol {
    /// An implementation of the add-in contract.
    Addin(AddinClass),
    /// Any other export (helper, metric function, constant); never loadable.
    Other { description: String },
}

/// Compiled-in table resolving `module.Name` references.
#[derive(Debug, Clone, Default)]
pub struct EntryPoints {
    modules: BTreeMap<String, BTreeMap<String, Symbol>>,
}

impl EntryPoints {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Export add-in type `T` under `path`.
    pub fn register<T: FromManifest>(&mut self, path: &str) -> Result<()> {
        self.insert(path, Symbol::Addin(AddinClass::of::<T>()))
    }

    /// Export a non-add-in symbol under `path`.
    pub fn register_other(&mut self, path: &str, description: impl Into<String>) -> Result<()> {
        self.insert(
            path,
            Symbol::Other {
                description: description.into(),
            },
        )
    }

    fn insert(&mut self, path: &str, symbol: Symbol) -> Result<()> {
        let (module, name) = split_path(path)?;
        let exports = self.modules.entry(module.to_string()).or_default();
        if exports.contains_key(name) {
            return Err(AddinError::Config(format!(
                "Entry point '{}' is already exported",
                path
            )));
        }
        exports.insert(name.to_string(), symbol);
        Ok(())
    }

    /// Resolve `path` to an add-in class.
    ///
    /// # Errors
    /// - `AddinError::EntryPoint` if the module or symbol does not exist
    /// - `AddinError::Contract` if the symbol is not an add-in class
    pub fn resolve(&self, path: &str) -> Result<&AddinClass> {
        let (module, name) = split_path(path)?;
        let exports = self
            .modules
            .get(module)
            .ok_or_else(|| AddinError::EntryPoint(format!("No module named '{}'", module)))?;
        match exports.get(name) {
            Some(Symbol::Addin(class)) => Ok(class),
            Some(Symbol::Other { description }) => Err(AddinError::Contract(format!(
                "'{}' is {}, not an add-in implementing run",
                path, description
            ))),
            None => Err(AddinError::EntryPoint(format!(
                "Module '{}' has no export '{}'",
                module, name
            ))),
        }
    }

    /// Every exported path, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|(module, exports)| {
                exports.keys().map(move |name| format!("{}.{}", module, name))
            })
            .collect()
    }
}

fn split_path(path: &str) -> Result<(&str, &str)> {
    match path.rsplit_once('.') {
        Some((module, name)) if !module.is_empty() && !name.is_empty() => Ok((module, name)),
        _ => Err(AddinError::EntryPoint(format!(
            "Entry point '{}' is not of the form module.Name",
            path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addins::manifest::validate_manifest;
    use serde_json::json;

    struct DummyAddin;

    impl Addin for DummyAddin {
        fn run(&self, _data: &AddinData, _options: &RunOptions) -> anyhow::Result<Value> {
            Ok(json!("ok"))
        }
    }

    impl FromManifest for DummyAddin {
        fn from_manifest(_manifest: &Manifest) -> anyhow::Result<Self> {
            Ok(DummyAddin)
        }
    }

    struct PickyAddin;

    impl Addin for PickyAddin {
        fn run(&self, _data: &AddinData, _options: &RunOptions) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    impl FromManifest for PickyAddin {
        fn from_manifest(manifest: &Manifest) -> anyhow::Result<Self> {
            anyhow::ensure!(!manifest.metrics().is_empty(), "needs at least one metric");
            Ok(PickyAddin)
        }
    }

    fn manifest() -> Manifest {
        let doc: serde_yaml::Value =
            serde_yaml::from_str("name: dummy\nversion: \"0.1.0\"\nentry_point: tests.DummyAddin")
                .unwrap();
        validate_manifest(&doc).unwrap()
    }

    #[test]
    fn test_dummy_addin_runs() {
        let addin = DummyAddin;
        let out = addin
            .run(&AddinData::List(vec![]), &RunOptions::new())
            .unwrap();
        assert_eq!(out, json!("ok"));
        assert!(addin.metadata().is_none());
    }

    #[test]
    fn test_resolve_registered_class() {
        let mut eps = EntryPoints::new();
        eps.register::<DummyAddin>("tests.DummyAddin").unwrap();

        let class = eps.resolve("tests.DummyAddin").unwrap();
        assert!(class.type_name().ends_with("DummyAddin"));

        let instance = class.instantiate(&manifest()).unwrap();
        let out = instance
            .run(&AddinData::List(vec![]), &RunOptions::new())
            .unwrap();
        assert_eq!(out, json!("ok"));
    }

    #[test]
    fn test_resolve_unknown_module_and_symbol() {
        let mut eps = EntryPoints::new();
        eps.register::<DummyAddin>("tests.DummyAddin").unwrap();

        let err = eps.resolve("missing.DummyAddin").unwrap_err();
        assert!(matches!(err, AddinError::EntryPoint(_)));
        assert!(err.to_string().contains("No module named 'missing'"));

        let err = eps.resolve("tests.DoesNotExist").unwrap_err();
        assert!(matches!(err, AddinError::EntryPoint(_)));
    }

    #[test]
    fn test_resolve_non_addin_symbol_is_contract_error() {
        let mut eps = EntryPoints::new();
        eps.register_other("tests.NotAnAddin", "a plain helper struct")
            .unwrap();

        let err = eps.resolve("tests.NotAnAddin").unwrap_err();
        assert!(matches!(err, AddinError::Contract(_)));
        assert!(err.to_string().contains("not an add-in"));
    }

    #[test]
    fn test_duplicate_export_rejected() {
        let mut eps = EntryPoints::new();
        eps.register::<DummyAddin>("tests.DummyAddin").unwrap();
        assert!(eps.register::<DummyAddin>("tests.DummyAddin").is_err());
        assert!(eps.register::<DummyAddin>("NoModule").is_err());
    }

    #[test]
    fn test_failed_construction_is_contract_error() {
        let class = AddinClass::of::<PickyAddin>();
        let err = class.instantiate(&manifest()).err().unwrap();
        assert!(matches!(err, AddinError::Contract(_)));
        assert!(err.to_string().contains("needs at least one metric"));
    }

    #[test]
    fn test_paths_sorted() {
        let mut eps = EntryPoints::new();
        eps.register::<DummyAddin>("b.Second").unwrap();
        eps.register::<DummyAddin>("a.First").unwrap();
        assert_eq!(eps.paths(), vec!["a.First", "b.Second"]);
    }

    #[test]
    fn test_run_options_pairs() {
        let mut options = RunOptions::new();
        options.insert_pair("confidence_level=0.9").unwrap();
        options.insert_pair("column=score").unwrap();
        options.insert_pair("columns=[\"a\",\"b\"]").unwrap();

        assert_eq!(options.get_f64("confidence_level"), Some(0.9));
        assert_eq!(options.get_str("column"), Some("score"));
        assert_eq!(
            options.get_str_list("columns"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(options.insert_pair("no-equals").is_err());
        assert!(options.insert_pair("=1").is_err());
    }

    #[test]
    fn test_run_options_comma_list() {
        let options = RunOptions::new().with("columns", "score, latency");
        assert_eq!(
            options.get_str_list("columns"),
            Some(vec!["score".to_string(), "latency".to_string()])
        );
    }
}
