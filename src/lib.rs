//! PromptLab - prompt-engineering research toolkit with manifest-driven
//! analytics add-ins

pub mod addins;
pub mod config;
pub mod data;
pub mod error;

pub use addins::{AddinRegistry, AddinRunner, EntryPoints, Manifest};
pub use config::AnalyticsConfig;
pub use data::AddinData;
pub use error::{AddinError, Result};
