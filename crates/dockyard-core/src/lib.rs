//! Core orchestration for Dockyard build environments.
//!
//! This crate ties the schema and the process runtime together into the
//! `EnvironmentManager` (one-shot provisioning and teardown of the container
//! runtime and image builder), the `BuildPipeline` (validate, package, invoke
//! the builder), and the `LogFanout` sink every component reports through.
//! It also provides output locking, readiness signalling, and state-machine
//! validation for the environment lifecycle.

pub mod concurrency;
pub mod environment;
pub mod lifecycle;
pub mod logsink;
pub mod observers;
pub mod orchestrator;
pub mod packaging;
pub mod pipeline;
pub mod readiness;

pub use concurrency::{install_signal_handler, shutdown_requested, OutputLock};
pub use environment::EnvironmentManager;
pub use lifecycle::{validate_transition, EnvPhase};
pub use logsink::{LogFanout, LogLevel, LogLine, LogObserver, ObserverError, ObserverId, Subscription};
pub use observers::{AffinityObserver, ChannelObserver, DisplayBuffer, FnObserver, TracingObserver};
pub use orchestrator::{CatalogEntry, Orchestrator};
pub use packaging::{packager_for, ContextPackager, ManifestPackager, PackageReport, TarPackager};
pub use pipeline::{builder_args, BuildPipeline, BuildReport};
pub use readiness::Readiness;

use dockyard_runtime::RuntimeError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] dockyard_schema::ValidationError),
    #[error("config error: {0}")]
    Config(#[from] dockyard_schema::ConfigError),
    #[error("script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),
    #[error("failed to launch {}: {reason}", path.display())]
    Launch { path: PathBuf, reason: String },
    #[error("privilege error: {0}")]
    Privilege(String),
    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },
    #[error("{program} exited with code {code}")]
    NonZeroExit { program: String, code: i32 },
    #[error("packaging failed: {0}")]
    Packaging(String),
    #[error("build failed with exit code {code}")]
    BuildFailed { code: i32 },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RuntimeError> for CoreError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Launch { path, reason } => CoreError::Launch { path, reason },
            RuntimeError::Privilege(reason) => CoreError::Privilege(reason),
            RuntimeError::Io(e) => CoreError::Io(e),
        }
    }
}

impl CoreError {
    /// Errors caused by bad input rather than by the environment.
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }
}
