use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A single external process invocation.
///
/// Built with the `with_*` methods and then handed to a runner by reference;
/// one request corresponds to exactly one spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Bound the wait for process exit. `None` waits forever.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Human-readable command line, for log lines only. Not shell-safe.
    pub fn display_command(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Outcome of one [`ExecutionRequest`].
///
/// `exit_code` is `None` exactly when the process was killed for exceeding
/// its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            timed_out: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            exit_code: None,
            timed_out: true,
        }
    }

    pub fn completed(&self) -> bool {
        !self.timed_out
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_arguments_in_order() {
        let req = ExecutionRequest::new("sh")
            .with_arg("-c")
            .with_args(["echo", "hi"])
            .with_working_dir("/tmp")
            .with_timeout(Some(Duration::from_secs(60)));

        assert_eq!(req.program(), Path::new("sh"));
        assert_eq!(req.args(), ["-c", "echo", "hi"]);
        assert_eq!(req.working_dir(), Some(Path::new("/tmp")));
        assert_eq!(req.timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn default_request_is_unbounded() {
        let req = ExecutionRequest::new("/usr/bin/true");
        assert!(req.timeout().is_none());
        assert!(req.working_dir().is_none());
        assert!(req.args().is_empty());
    }

    #[test]
    fn display_command_joins_program_and_args() {
        let req = ExecutionRequest::new("buildctl").with_args(["build", "--frontend=dockerfile.v0"]);
        assert_eq!(req.display_command(), "buildctl build --frontend=dockerfile.v0");
    }

    #[test]
    fn result_predicates() {
        assert!(ExecutionResult::exited(0).success());
        assert!(ExecutionResult::exited(0).completed());
        assert!(!ExecutionResult::exited(137).success());
        assert!(ExecutionResult::exited(137).completed());

        let t = ExecutionResult::timeout();
        assert!(!t.success());
        assert!(!t.completed());
        assert_eq!(t.exit_code, None);
    }
}
