pub mod build;
pub mod catalog;
pub mod completions;
pub mod doctor;
pub mod man_pages;
pub mod teardown;
pub mod up;

use dockyard_core::{CoreError, FnObserver, LogLine, ObserverId, Orchestrator};
use dockyard_runtime::{PrivilegeGate, ProcessRunner, SystemRunner};
use dockyard_schema::DockyardConfig;
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_VALIDATION_ERROR: u8 = 3;

/// Lines kept from the display buffer in JSON results.
const LOG_TAIL_LINES: usize = 20;

/// Everything a command needs: the orchestrator for this process and the
/// async runtime that drives it.
pub struct Session {
    runtime: tokio::runtime::Runtime,
    orchestrator: Orchestrator,
}

impl Session {
    pub fn new(config: DockyardConfig, gate: Arc<dyn PrivilegeGate>) -> Result<Self, String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("failed to start async runtime: {e}"))?;
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
        let orchestrator = Orchestrator::new(config, runner, gate);
        Ok(Self {
            runtime,
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &DockyardConfig {
        self.orchestrator.config()
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Print operator log lines above the spinner while it runs.
    pub fn attach_progress(&self, pb: &ProgressBar) -> ObserverId {
        let pb = pb.clone();
        self.orchestrator
            .log()
            .register(Arc::new(FnObserver::new(move |line: &LogLine| {
                pb.println(line.render());
            })))
    }

    pub fn detach(&self, id: ObserverId) {
        self.orchestrator.log().unregister(id);
    }

    /// Last lines of the display buffer, oldest first.
    pub fn log_tail(&self) -> Vec<String> {
        let text = self.orchestrator.display().text();
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(LOG_TAIL_LINES);
        lines[start..].iter().map(|l| (*l).to_owned()).collect()
    }
}

/// Render a core error for the command boundary. Validation and config
/// failures get the prefixes `exit_code_for` keys on.
pub fn core_err(e: &CoreError) -> String {
    match e {
        CoreError::Validation(_) => format!("validation error: {e}"),
        _ => e.to_string(),
    }
}

pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("config error:") {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("validation error:") {
        EXIT_VALIDATION_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "built" | "ready" | "stopped" => Style::new().green().apply_to(status).to_string(),
        "build" => Style::new().yellow().apply_to(status).to_string(),
        "failed" => Style::new().red().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}
