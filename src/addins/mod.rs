//! Analytics add-in system for PromptLab
//!
//! Add-ins are pluggable analytics routines (statistics, aggregate metrics,
//! report builders) described by YAML manifests. Each manifest names the
//! add-in, declares the data it accepts, and points at an implementation in
//! the compiled-in entry point table.
//!
//! # Architecture
//!
//! - **types**: The validated `Manifest` and its parts (input descriptors, metrics, dependencies)
//! - **manifest**: Manifest validation from a file or an in-memory YAML mapping
//! - **validator**: Runtime data checks against a manifest's declared input types
//! - **base**: The `Addin` trait, run options and the `EntryPoints` table
//! - **builtin**: Statistical add-ins shipped with PromptLab
//! - **registry**: Discovery, resolution and duplicate handling
//! - **runner**: Failure-isolating execution with logging and time budgets
//!
//! # Manifest Directory Structure
//!
//! ```text
//! addins/
//! ├── confidence_interval.yaml
//! ├── descriptive_stats.yaml
//! └── effect_size.yaml
//! ```
//!
//! # Example manifest
//!
//! ```yaml
//! name: descriptive_stats
//! version: "1.0.0"
//! author: PromptLab
//! description: Summary statistics for numeric result columns
//! entry_point: promptlab.stats.DescriptiveStats
//! input_data_types:
//!   - DataFrame
//! metrics:
//!   - name: mean
//!     description: Arithmetic mean per column
//! dependencies:
//!   - promptlab>=0.4
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use promptlab::addins::{AddinRegistry, AddinRunner, EntryPoints, RunOptions};
//! use promptlab::data::AddinData;
//! use serde_json::json;
//!
//! let mut registry = AddinRegistry::new(Arc::new(EntryPoints::builtin().unwrap()));
//! registry.discover_from_manifests(Path::new("addins")).unwrap();
//!
//! let data = AddinData::from_json(json!([{"score": 0.8}, {"score": 0.6}])).unwrap();
//! let loaded = registry.instantiate("descriptive_stats").unwrap();
//! match AddinRunner::default().run_loaded(&loaded, &data, &RunOptions::new()) {
//!     Ok(result) => println!("{}", result),
//!     Err(e) => eprintln!("{}", e),
//! }
//! ```

pub mod base;
pub mod builtin;
pub mod manifest;
pub mod registry;
pub mod runner;
pub mod types;
pub mod validator;

pub use base::{Addin, AddinClass, AddinMetadata, EntryPoints, FromManifest, RunOptions, Symbol};
pub use manifest::{validate_manifest, ManifestSource};
pub use registry::{AddinEntry, AddinRegistry, DiscoveryFailure, HostPackages, LoadedAddin};
pub use runner::{run_addin_with_logging, AddinRunner, ExecutionError, FailureKind, RunOutcome};
pub use types::{ColumnSpec, Comparator, Dependency, InputDataType, Manifest, MetricSpec};
pub use validator::validate_input_data;
