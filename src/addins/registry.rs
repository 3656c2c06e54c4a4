//! Add-in registry for PromptLab
//!
//! This module provides the `AddinRegistry`, which discovers manifest files,
//! validates them, resolves their entry points against the compiled-in
//! [`EntryPoints`] table and keeps an ordered name-to-class mapping.
//!
//! Discovery is split into a pure [`AddinRegistry::prepare`] step (manifest
//! validation, entry point resolution, dependency check) and a single
//! [`AddinRegistry::insert`] writer. Callers may run `prepare` for many
//! files in parallel as long as insertion happens in filename order.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use tracing::{debug, info, warn};

use crate::config::AddinsConfig;
use crate::error::{AddinError, Result};

use super::base::{Addin, AddinClass, AddinMetadata, EntryPoints};
use super::manifest::validate_manifest;
use super::types::{Dependency, Manifest};

/// Source recorded for entries added through [`AddinRegistry::register`].
const REGISTERED_SOURCE: &str = "<registered>";

/// Manifest file extensions picked up by discovery.
const MANIFEST_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Versions of the packages add-in dependency constraints are checked against.
#[derive(Debug, Clone)]
pub struct HostPackages {
    packages: HashMap<String, Version>,
}

impl HostPackages {
    /// A table seeded with this crate (`promptlab`) at its own version.
    pub fn new() -> Self {
        let mut host = Self::empty();
        if let Ok(version) = Version::parse(env!("CARGO_PKG_VERSION")) {
            host.insert(env!("CARGO_PKG_NAME"), version);
        }
        host
    }

    pub fn empty() -> Self {
        Self {
            packages: HashMap::new(),
        }
    }

    pub fn insert(&mut self, package: impl Into<String>, version: Version) {
        self.packages.insert(package.into(), version);
    }

    /// Check one constraint.
    ///
    /// Unknown packages pass unless `strict` is set.
    pub fn check(&self, dependency: &Dependency, strict: bool) -> Result<()> {
        match self.packages.get(&dependency.package) {
            Some(installed) if dependency.matches(installed) => Ok(()),
            Some(installed) => Err(AddinError::Dependency(format!(
                "{} is required but {} {} is installed",
                dependency, dependency.package, installed
            ))),
            None if strict => Err(AddinError::Dependency(format!(
                "{} is required but {} is not a known host package",
                dependency, dependency.package
            ))),
            None => {
                debug!(
                    dependency = %dependency,
                    "Dependency on unknown package not checked"
                );
                Ok(())
            }
        }
    }
}

impl Default for HostPackages {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered add-in: its manifest, resolved class and where it came from.
#[derive(Debug, Clone)]
pub struct AddinEntry {
    pub manifest: Arc<Manifest>,
    pub class: AddinClass,
    pub source: PathBuf,
}

impl AddinEntry {
    pub fn name(&self) -> &str {
        self.manifest.name()
    }
}

/// A manifest that was skipped during discovery, and why.
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub path: PathBuf,
    pub error: AddinError,
}

/// A fresh add-in instance together with the manifest it was built from.
#[derive(Clone)]
pub struct LoadedAddin {
    pub manifest: Arc<Manifest>,
    pub instance: Arc<dyn Addin>,
}

impl LoadedAddin {
    pub fn name(&self) -> &str {
        self.manifest.name()
    }
}

impl std::fmt::Debug for LoadedAddin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedAddin")
            .field("name", &self.manifest.name())
            .field("version", &self.manifest.version())
            .finish()
    }
}

/// An owned registry of add-ins built by discovery.
///
/// Entries are kept in registration order and never removed. The first
/// registration of a name wins; later manifests declaring the same name are
/// rejected and recorded in [`failures`](Self::failures).
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use promptlab::addins::{AddinRegistry, EntryPoints};
///
/// let entry_points = Arc::new(EntryPoints::builtin().unwrap());
/// let mut registry = AddinRegistry::new(entry_points);
/// let count = registry.discover_from_manifests("addins".as_ref()).unwrap();
/// assert_eq!(count, registry.len());
/// ```
pub struct AddinRegistry {
    entry_points: Arc<EntryPoints>,
    host: HostPackages,
    config: AddinsConfig,

    /// Metric categories whose add-ins are not registered.
    disabled_categories: BTreeSet<String>,

    /// Entries in registration order.
    entries: Vec<AddinEntry>,

    /// Map from add-in name to its index in `entries`.
    index: HashMap<String, usize>,

    failures: Vec<DiscoveryFailure>,
}

impl AddinRegistry {
    /// Create an empty registry resolving entry points against `entry_points`.
    pub fn new(entry_points: Arc<EntryPoints>) -> Self {
        Self::with_config(entry_points, AddinsConfig::default())
    }

    /// Create an empty registry honoring the allow/block lists and
    /// dependency strictness of `config`.
    pub fn with_config(entry_points: Arc<EntryPoints>, config: AddinsConfig) -> Self {
        Self {
            entry_points,
            host: HostPackages::new(),
            config,
            disabled_categories: BTreeSet::new(),
            entries: Vec::new(),
            index: HashMap::new(),
            failures: Vec::new(),
        }
    }

    /// Skip add-ins whose manifest `category` is in `categories`.
    pub fn with_disabled_categories(mut self, categories: BTreeSet<String>) -> Self {
        self.disabled_categories = categories;
        self
    }

    /// Replace the host package table used for dependency checks.
    pub fn with_host_packages(mut self, host: HostPackages) -> Self {
        self.host = host;
        self
    }

    /// Scan `dir` for manifest files and register every valid add-in.
    ///
    /// Files ending in `.yaml` or `.yml` are processed in lexicographic
    /// filename order; subdirectories are not entered. A manifest that fails
    /// validation, resolution or the dependency check is skipped, logged and
    /// recorded in [`failures`](Self::failures); its siblings are unaffected.
    ///
    /// # Returns
    /// The number of add-ins registered by this call. A directory that does
    /// not exist registers nothing.
    ///
    /// # Errors
    /// - `AddinError::Config` if `dir` exists but is not a directory
    /// - `AddinError::Io` if the directory cannot be listed
    pub fn discover_from_manifests(&mut self, dir: &Path) -> Result<usize> {
        let files = manifest_files(dir)?;
        let mut registered = 0;

        for path in files {
            match self.prepare(&path).and_then(|entry| self.insert(entry)) {
                Ok(()) => registered += 1,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to register add-in, skipping"
                    );
                    self.failures.push(DiscoveryFailure { path, error: e });
                }
            }
        }

        info!(
            dir = %dir.display(),
            registered,
            total = self.entries.len(),
            "Add-in discovery finished"
        );
        Ok(registered)
    }

    /// Run discovery over several directories in order.
    pub fn discover_all(&mut self, dirs: &[PathBuf]) -> Result<usize> {
        let mut registered = 0;
        for dir in dirs {
            registered += self.discover_from_manifests(dir)?;
        }
        Ok(registered)
    }

    /// Validate the manifest at `path` and resolve it into an entry, without
    /// touching the registry.
    ///
    /// # Errors
    /// - `AddinError::Manifest` / `Io` if the manifest is invalid or unreadable
    /// - `AddinError::Blocked` if configuration excludes the add-in
    /// - `AddinError::CategoryDisabled` if its metric category is switched off
    /// - `AddinError::EntryPoint` / `Contract` if the entry point does not
    ///   resolve to an add-in class
    /// - `AddinError::Dependency` if a dependency constraint is unsatisfied
    pub fn prepare(&self, path: &Path) -> Result<AddinEntry> {
        let manifest = validate_manifest(path)?;
        self.resolve(manifest, path.to_path_buf())
    }

    fn check_permitted(&self, manifest: &Manifest) -> Result<()> {
        if !self.config.is_addin_permitted(manifest.name()) {
            return Err(AddinError::Blocked(manifest.name().to_string()));
        }
        match manifest.category() {
            Some(category) if self.disabled_categories.contains(category) => {
                Err(AddinError::CategoryDisabled {
                    name: manifest.name().to_string(),
                    category: category.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn resolve(&self, manifest: Manifest, source: PathBuf) -> Result<AddinEntry> {
        self.check_permitted(&manifest)?;

        let class = self.entry_points.resolve(manifest.entry_point())?.clone();

        for dependency in manifest.dependencies() {
            self.host
                .check(dependency, self.config.strict_dependencies)
                .map_err(|e| match e {
                    AddinError::Dependency(msg) => AddinError::Dependency(format!(
                        "Add-in '{}': {}",
                        manifest.name(),
                        msg
                    )),
                    other => other,
                })?;
        }

        Ok(AddinEntry {
            manifest: Arc::new(manifest),
            class,
            source,
        })
    }

    /// Insert a prepared entry.
    ///
    /// # Errors
    /// `AddinError::Duplicate` if the name is already registered; the
    /// registry is unchanged.
    pub fn insert(&mut self, entry: AddinEntry) -> Result<()> {
        let name = entry.name().to_string();
        if let Some(&idx) = self.index.get(&name) {
            let existing = &self.entries[idx];
            return Err(AddinError::Duplicate {
                name,
                existing: existing.source.clone(),
            });
        }

        info!(
            addin = %name,
            version = %entry.manifest.version(),
            entry_point = %entry.manifest.entry_point(),
            source = %entry.source.display(),
            "Registered add-in"
        );

        self.index.insert(name, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Register an already validated manifest with an explicit class,
    /// bypassing entry point resolution. Duplicate, allow/block and metric
    /// category rules still apply.
    pub fn register(&mut self, manifest: Manifest, class: AddinClass) -> Result<()> {
        self.check_permitted(&manifest)?;
        self.insert(AddinEntry {
            manifest: Arc::new(manifest),
            class,
            source: PathBuf::from(REGISTERED_SOURCE),
        })
    }

    /// Get the class registered under `name`.
    ///
    /// # Errors
    /// `AddinError::NotFound` if `name` was never successfully registered.
    pub fn get(&self, name: &str) -> Result<&AddinClass> {
        self.entry(name).map(|e| &e.class)
    }

    /// Get the full entry registered under `name`.
    pub fn entry(&self, name: &str) -> Result<&AddinEntry> {
        self.index
            .get(name)
            .map(|&idx| &self.entries[idx])
            .ok_or_else(|| AddinError::NotFound(format!("No add-in named '{}' is registered", name)))
    }

    /// Registered names in registration order.
    pub fn list(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    /// All entries in registration order.
    pub fn entries(&self) -> &[AddinEntry] {
        &self.entries
    }

    /// Manifests skipped by discovery so far.
    pub fn failures(&self) -> &[DiscoveryFailure] {
        &self.failures
    }

    /// Construct a fresh instance of the add-in registered under `name`.
    pub fn instantiate(&self, name: &str) -> Result<LoadedAddin> {
        let entry = self.entry(name)?;
        let instance = entry.class.instantiate(&entry.manifest)?;
        Ok(LoadedAddin {
            manifest: Arc::clone(&entry.manifest),
            instance,
        })
    }

    /// Metadata reported by the add-in itself, if it reports any.
    pub fn describe(&self, name: &str) -> Result<Option<AddinMetadata>> {
        Ok(self.instantiate(name)?.instance.metadata())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

/// Manifest files directly inside `dir`, sorted by file name.
pub fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        info!(dir = %dir.display(), "Add-in directory does not exist, skipping");
        return Ok(Vec::new());
    }

    if !dir.is_dir() {
        return Err(AddinError::Config(format!(
            "Add-in path is not a directory: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_manifest = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| MANIFEST_EXTENSIONS.contains(&ext));
        if is_manifest {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
