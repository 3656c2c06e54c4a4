//! Error types for PromptLab
//!
//! This module defines the error taxonomy used by manifest validation,
//! input data validation, entry point resolution and registry lookups.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! Execution-time outcomes of an add-in are *not* represented here; the
//! runner converts them into [`crate::addins::ExecutionError`] values.

use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for PromptLab operations.
#[derive(Error, Debug)]
pub enum AddinError {
    /// Malformed or incomplete add-in manifest.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Entry point resolves, but not to something implementing the add-in contract.
    #[error("Contract error: {0}")]
    Contract(String),

    /// Runtime data does not match the shape declared by a manifest.
    #[error("Data validation error: {0}")]
    DataValidation(String),

    /// Lookup of a name that was never registered.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entry point reference that cannot be resolved to any known symbol.
    #[error("Entry point error: {0}")]
    EntryPoint(String),

    /// A declared dependency constraint is not satisfied by the host.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// A second manifest declared a name that is already registered.
    #[error("Duplicate add-in '{name}': already registered from {}", existing.display())]
    Duplicate { name: String, existing: PathBuf },

    /// Add-in excluded by the configured allow/block lists.
    #[error("Add-in '{0}' is not permitted by configuration")]
    Blocked(String),

    /// Add-in reports under a metric category switched off in configuration.
    #[error("Add-in '{name}' belongs to disabled metric category '{category}'")]
    CategoryDisabled { name: String, category: String },

    /// Configuration-related errors (invalid config, bad overrides, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse errors (manifests, config files)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AddinError {
    /// Whether this error describes a shape/validation problem rather than
    /// an operational one.
    pub fn is_validation(&self) -> bool {
        matches!(self, AddinError::DataValidation(_) | AddinError::Manifest(_))
    }
}

/// A specialized `Result` type for PromptLab operations.
pub type Result<T> = std::result::Result<T, AddinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AddinError::Manifest("missing entry_point".to_string());
        assert_eq!(err.to_string(), "Manifest error: missing entry_point");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AddinError = io_err.into();
        assert!(matches!(err, AddinError::Io(_)));
    }

    #[test]
    fn test_duplicate_display_names_existing_path() {
        let err = AddinError::Duplicate {
            name: "scores".to_string(),
            existing: PathBuf::from("/addins/a.yaml"),
        };
        let msg = err.to_string();
        assert!(msg.contains("scores"));
        assert!(msg.contains("/addins/a.yaml"));
    }

    #[test]
    fn test_is_validation() {
        assert!(AddinError::DataValidation("x".into()).is_validation());
        assert!(AddinError::Manifest("x".into()).is_validation());
        assert!(!AddinError::NotFound("x".into()).is_validation());
        assert!(!AddinError::Contract("x".into()).is_validation());
    }
}
