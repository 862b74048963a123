//! Data model for Dockyard.
//!
//! This crate defines the values that flow between the orchestration layers:
//! process invocations (`ExecutionRequest` / `ExecutionResult`), validated
//! image build jobs (`BuildJob`), and the TOML configuration
//! (`DockyardConfig`) naming the environment scripts, the builder executable,
//! and packaging and logging settings.

pub mod config;
pub mod job;
pub mod request;
pub mod types;

pub use config::{
    BuilderSection, CatalogSection, ConfigError, DockyardConfig, ElevationSection, LogSection,
    PackagingMode, PackagingSection, ScriptKind, ScriptsSection, DEFAULT_CONFIG_FILE,
};
pub use job::{BuildJob, JobField, ValidationError};
pub use request::{ExecutionRequest, ExecutionResult};
pub use types::ContainerName;
