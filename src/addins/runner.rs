//! Add-in execution with failure isolation.
//!
//! The runner is the boundary between host code and add-in code. Whatever
//! an add-in does (returns an error, panics, overruns its time budget), the
//! caller gets back a [`RunOutcome`]: the result value or an
//! [`ExecutionError`] describing the failure. Nothing propagates past it, so
//! a batch over many add-ins yields partial results instead of aborting.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info_span, span::EnteredSpan, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::data::AddinData;
use crate::error::AddinError;

use super::base::{Addin, RunOptions};
use super::registry::LoadedAddin;
use super::types::Manifest;
use super::validator::validate_input_data;

/// Name logged for add-ins run without a manifest or metadata.
const UNNAMED_ADDIN: &str = "<unnamed>";

/// Classification of an add-in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The input did not match the add-in's declared data contract.
    Validation,
    /// The add-in returned an error, or ran past its time budget.
    Runtime { timeout: bool },
    /// The add-in panicked or its task was lost.
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "ValidationFailure"),
            Self::Runtime { timeout: false } => write!(f, "RuntimeFailure"),
            Self::Runtime { timeout: true } => write!(f, "RuntimeFailure(timeout)"),
            Self::Unknown => write!(f, "UnknownFailure"),
        }
    }
}

impl Serialize for FailureKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A failed add-in invocation.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind} in add-in '{addin}': {message}")]
pub struct ExecutionError {
    pub addin: String,
    /// Manifest version, when the add-in was run with its manifest.
    pub version: Option<String>,
    pub kind: FailureKind,
    pub message: String,
    /// Truncated rendering of the input payload.
    pub context: String,
    pub run_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

impl ExecutionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FailureKind::Runtime { timeout: true })
    }
}

/// Exactly one of a result value or an execution error.
pub type RunOutcome = std::result::Result<Value, ExecutionError>;

/// Span and timer for one invocation; logs the elapsed time when dropped,
/// on every exit path.
struct RunGuard {
    run_id: Uuid,
    started: Instant,
    succeeded: bool,
    _span: EnteredSpan,
}

impl RunGuard {
    fn enter(addin: &str, version: Option<&str>, run_id: Uuid) -> Self {
        let span = info_span!(
            "addin_run",
            addin = %addin,
            version = %version.unwrap_or("-"),
            run_id = %run_id
        );
        Self {
            run_id,
            started: Instant::now(),
            succeeded: false,
            _span: span.entered(),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        debug!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            succeeded = self.succeeded,
            "Add-in run finished"
        );
    }
}

/// Runs add-ins and converts every failure into an [`ExecutionError`].
#[derive(Debug, Clone, Default)]
pub struct AddinRunner {
    config: RunnerConfig,
    timeout: Option<Duration>,
}

impl AddinRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let timeout = config.timeout();
        Self { config, timeout }
    }

    /// Override the time budget used by [`run_timed`](Self::run_timed).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `addin` over `data`.
    ///
    /// When a manifest is given and input validation is enabled, `data` is
    /// checked against its declared input types first and the add-in is not
    /// called on a mismatch.
    pub fn run(
        &self,
        addin: &dyn Addin,
        manifest: Option<&Manifest>,
        data: &AddinData,
        options: &RunOptions,
    ) -> RunOutcome {
        self.run_with_id(addin, manifest, data, options, Uuid::new_v4())
    }

    fn run_with_id(
        &self,
        addin: &dyn Addin,
        manifest: Option<&Manifest>,
        data: &AddinData,
        options: &RunOptions,
        run_id: Uuid,
    ) -> RunOutcome {
        let name = addin_name(addin, manifest);
        let version = manifest.map(|m| m.version().to_string());
        let mut guard = RunGuard::enter(&name, version.as_deref(), run_id);

        match self.execute(addin, manifest, data, options) {
            Ok(value) => {
                guard.succeeded = true;
                Ok(value)
            }
            Err((kind, message)) => Err(self.failure(
                name,
                version,
                kind,
                message,
                data,
                guard.run_id,
            )),
        }
    }

    /// Run a registry-loaded add-in with its manifest.
    pub fn run_loaded(&self, loaded: &LoadedAddin, data: &AddinData, options: &RunOptions) -> RunOutcome {
        self.run(loaded.instance.as_ref(), Some(&loaded.manifest), data, options)
    }

    /// Run on the blocking pool under the configured time budget.
    ///
    /// An add-in that overruns is reported as `RuntimeFailure(timeout)`. Its
    /// thread cannot be interrupted and finishes in the background; the
    /// shared `data` stays alive until it does.
    pub async fn run_timed(
        &self,
        loaded: LoadedAddin,
        data: Arc<AddinData>,
        options: RunOptions,
    ) -> RunOutcome {
        let runner = self.clone();
        let manifest = Arc::clone(&loaded.manifest);
        let payload = Arc::clone(&data);
        let run_id = Uuid::new_v4();

        let task = tokio::task::spawn_blocking(move || {
            runner.run_with_id(
                loaded.instance.as_ref(),
                Some(&loaded.manifest),
                &data,
                &options,
                run_id,
            )
        });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(self.failure(
                        manifest.name().to_string(),
                        Some(manifest.version().to_string()),
                        FailureKind::Runtime { timeout: true },
                        format!("Add-in exceeded its time budget of {:?}", limit),
                        &payload,
                        run_id,
                    ));
                }
            },
            None => task.await,
        };

        joined.unwrap_or_else(|e| {
            Err(self.failure(
                manifest.name().to_string(),
                Some(manifest.version().to_string()),
                FailureKind::Unknown,
                format!("Add-in task failed: {}", e),
                &payload,
                run_id,
            ))
        })
    }

    /// Run several add-ins over the same data, collecting every outcome.
    pub fn run_batch(
        &self,
        addins: &[LoadedAddin],
        data: &AddinData,
        options: &RunOptions,
    ) -> Vec<(String, RunOutcome)> {
        addins
            .iter()
            .map(|loaded| (loaded.name().to_string(), self.run_loaded(loaded, data, options)))
            .collect()
    }

    fn execute(
        &self,
        addin: &dyn Addin,
        manifest: Option<&Manifest>,
        data: &AddinData,
        options: &RunOptions,
    ) -> std::result::Result<Value, (FailureKind, String)> {
        if self.config.validate_input {
            if let Some(manifest) = manifest {
                validate_input_data(data, manifest)
                    .map_err(|e| (FailureKind::Validation, e.to_string()))?;
            }
        }

        match panic::catch_unwind(AssertUnwindSafe(|| addin.run(data, options))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err((classify(&e), format!("{:#}", e))),
            Err(payload) => Err((FailureKind::Unknown, panic_message(payload.as_ref()))),
        }
    }

    fn failure(
        &self,
        addin: String,
        version: Option<String>,
        kind: FailureKind,
        message: String,
        data: &AddinData,
        run_id: Uuid,
    ) -> ExecutionError {
        let context = data.preview(self.config.payload_preview_chars);
        error!(
            addin = %addin,
            version = %version.as_deref().unwrap_or("-"),
            kind = %kind,
            run_id = %run_id,
            payload = %context,
            error = %message,
            "Add-in run failed"
        );
        ExecutionError {
            addin,
            version,
            kind,
            message,
            context,
            run_id,
            occurred_at: Utc::now(),
        }
    }
}

/// Run `addin` with the default runner settings and no manifest.
pub fn run_addin_with_logging(addin: &dyn Addin, data: &AddinData, options: &RunOptions) -> RunOutcome {
    AddinRunner::default().run(addin, None, data, options)
}

/// Manifest name, else the add-in's self-reported name. `metadata` is add-in
/// code, so a panic there falls back to [`UNNAMED_ADDIN`].
fn addin_name(addin: &dyn Addin, manifest: Option<&Manifest>) -> String {
    if let Some(m) = manifest {
        return m.name().to_string();
    }
    match panic::catch_unwind(AssertUnwindSafe(|| addin.metadata())) {
        Ok(Some(meta)) => meta.name,
        Ok(None) => UNNAMED_ADDIN.to_string(),
        Err(payload) => {
            warn!(error = %panic_message(payload.as_ref()), "Add-in metadata panicked");
            UNNAMED_ADDIN.to_string()
        }
    }
}

/// Validation problems anywhere in the error chain count as validation
/// failures; everything else is a runtime failure.
fn classify(err: &anyhow::Error) -> FailureKind {
    let is_validation = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<AddinError>())
        .any(AddinError::is_validation);
    if is_validation {
        FailureKind::Validation
    } else {
        FailureKind::Runtime { timeout: false }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match detail {
        Some(msg) => format!("Add-in panicked: {}", msg),
        None => {
            warn!("Add-in panicked with a non-string payload");
            "Add-in panicked".to_string()
        }
    }
}
