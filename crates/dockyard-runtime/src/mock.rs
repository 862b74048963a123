use crate::privilege::PrivilegeGate;
use crate::process::{OutputLine, ProcessRunner};
use crate::RuntimeError;
use async_trait::async_trait;
use dockyard_schema::{ExecutionRequest, ExecutionResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted outcome for one program or script path.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Simulated run time. Longer than the request timeout means timed out.
    pub duration: Duration,
    /// Behave as if the executable does not exist.
    pub missing: bool,
}

impl MockBehavior {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_stdout<I: IntoIterator<Item = S>, S: Into<String>>(mut self, lines: I) -> Self {
        self.stdout.extend(lines.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_stderr<I: IntoIterator<Item = S>, S: Into<String>>(mut self, lines: I) -> Self {
        self.stderr.extend(lines.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn running_for(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// In-memory runner that never spawns anything.
///
/// A request is matched by its program path first, then by any argument
/// (scripts are passed to an interpreter as an argument). Unmatched requests
/// exit 0 silently.
#[derive(Default)]
pub struct MockRunner {
    behaviors: Mutex<HashMap<PathBuf, MockBehavior>>,
    calls: Mutex<Vec<ExecutionRequest>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, key: impl Into<PathBuf>, behavior: MockBehavior) -> Self {
        self.set(key, behavior);
        self
    }

    pub fn set(&self, key: impl Into<PathBuf>, behavior: MockBehavior) {
        if let Ok(mut map) = self.behaviors.lock() {
            map.insert(key.into(), behavior);
        }
    }

    /// Requests that got as far as a (simulated) spawn.
    pub fn calls(&self) -> Vec<ExecutionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn spawn_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Whether any spawned request named `key` as program or argument.
    pub fn was_invoked(&self, key: &Path) -> bool {
        self.calls().iter().any(|req| request_mentions(req, key))
    }

    fn behavior_for(&self, request: &ExecutionRequest) -> Result<MockBehavior, RuntimeError> {
        let map = self
            .behaviors
            .lock()
            .map_err(|e| RuntimeError::Io(std::io::Error::other(format!("mutex poisoned: {e}"))))?;
        if let Some(b) = map.get(request.program()) {
            return Ok(b.clone());
        }
        Ok(request
            .args()
            .iter()
            .rev()
            .find_map(|arg| map.get(Path::new(arg)))
            .cloned()
            .unwrap_or_default())
    }
}

fn request_mentions(request: &ExecutionRequest, key: &Path) -> bool {
    request.program() == key || request.args().iter().any(|a| Path::new(a) == key)
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn run(
        &self,
        request: &ExecutionRequest,
        on_line: &(dyn Fn(OutputLine) + Send + Sync),
    ) -> Result<ExecutionResult, RuntimeError> {
        let behavior = self.behavior_for(request)?;
        if behavior.missing {
            return Err(RuntimeError::Launch {
                path: request.program().to_path_buf(),
                reason: "executable not found".to_owned(),
            });
        }
        self.calls
            .lock()
            .map_err(|e| RuntimeError::Io(std::io::Error::other(format!("mutex poisoned: {e}"))))?
            .push(request.clone());

        for line in &behavior.stdout {
            on_line(OutputLine::stdout(line.clone()));
        }
        for line in &behavior.stderr {
            on_line(OutputLine::stderr(line.clone()));
        }

        match request.timeout() {
            Some(limit) if behavior.duration > limit => {
                tokio::time::sleep(limit).await;
                Ok(ExecutionResult::timeout())
            }
            _ => {
                if !behavior.duration.is_zero() {
                    tokio::time::sleep(behavior.duration).await;
                }
                Ok(ExecutionResult::exited(behavior.exit_code))
            }
        }
    }
}

/// Privilege gate with a fixed answer, counting relaunch attempts.
pub struct MockGate {
    elevated: bool,
    relaunch: bool,
    relaunch_result: Result<i32, String>,
    relaunches: AtomicUsize,
}

impl MockGate {
    pub fn elevated() -> Self {
        Self {
            elevated: true,
            relaunch: false,
            relaunch_result: Ok(0),
            relaunches: AtomicUsize::new(0),
        }
    }

    pub fn unelevated(relaunch_result: Result<i32, String>) -> Self {
        Self {
            elevated: false,
            relaunch: false,
            relaunch_result,
            relaunches: AtomicUsize::new(0),
        }
    }

    /// Pretend this instance was started by a previous relaunch.
    #[must_use]
    pub fn as_relaunch(mut self) -> Self {
        self.relaunch = true;
        self
    }

    pub fn relaunch_count(&self) -> usize {
        self.relaunches.load(Ordering::SeqCst)
    }
}

impl PrivilegeGate for MockGate {
    fn is_elevated(&self) -> bool {
        self.elevated
    }

    fn is_relaunch(&self) -> bool {
        self.relaunch
    }

    fn relaunch_elevated(&self) -> Result<i32, RuntimeError> {
        self.relaunches.fetch_add(1, Ordering::SeqCst);
        self.relaunch_result.clone().map_err(RuntimeError::Privilege)
    }
}
