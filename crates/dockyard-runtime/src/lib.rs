//! Process execution layer for Dockyard.
//!
//! This crate owns everything that touches external processes directly: the
//! `ProcessRunner` trait with its tokio-backed `SystemRunner` (line-by-line
//! stdout/stderr capture, bounded waits, forced termination on timeout), a
//! scripted `MockRunner` for tests, the privilege gate that relaunches the
//! application elevated, and host prerequisite checks.

pub mod mock;
pub mod prereq;
pub mod privilege;
pub mod process;

pub use mock::{MockBehavior, MockGate, MockRunner};
pub use prereq::{check_environment_prereqs, MissingPrereq};
pub use privilege::{
    ensure_elevated, skip_requested, Elevation, PrivilegeGate, SkippedGate, SystemGate,
    ELEVATED_MARKER_ENV, SKIP_ELEVATION_ENV,
};
pub use process::{
    active_process_groups, kill_active_process_groups, OutputLine, OutputStream, ProcessRunner,
    SystemRunner,
};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to launch {}: {reason}", path.display())]
    Launch { path: PathBuf, reason: String },
    #[error("privilege escalation failed: {0}")]
    Privilege(String),
}
