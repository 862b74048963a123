use crate::RuntimeError;
use async_trait::async_trait;
use dockyard_schema::{ExecutionRequest, ExecutionResult};
use serde::Serialize;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long output is still collected after the child has exited. Daemons
/// started by a script can inherit its pipes and keep them open forever.
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Process groups led by children that are still being run. `kill_on_drop`
/// does not fire on `process::exit`, so a forced exit kills these first.
static ACTIVE_GROUPS: Mutex<Vec<u32>> = Mutex::new(Vec::new());

/// Registration of one child's process group, removed on drop.
struct ActiveGroup(u32);

impl ActiveGroup {
    fn register(pid: Option<u32>) -> Option<Self> {
        let pid = pid?;
        ACTIVE_GROUPS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pid);
        Some(Self(pid))
    }
}

impl Drop for ActiveGroup {
    fn drop(&mut self) {
        ACTIVE_GROUPS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|pid| *pid != self.0);
    }
}

/// Leader pids of the children currently running.
pub fn active_process_groups() -> Vec<u32> {
    ACTIVE_GROUPS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// SIGKILL every running child's process group. Returns how many groups
/// were signalled.
pub fn kill_active_process_groups() -> usize {
    let groups = active_process_groups();
    #[cfg(unix)]
    for pid in &groups {
        kill_process_group(*pid);
    }
    groups.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// Launches one external process per call and reports its outcome.
///
/// Every non-empty output line is handed to `on_line` as it arrives. Lines of
/// one stream keep their order; the two streams are not ordered against each
/// other. When the request carries a timeout and the process outlives it, the
/// process is killed and reaped before `ExecutionResult::timeout()` is
/// returned, and `on_line` is not called again.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        request: &ExecutionRequest,
        on_line: &(dyn Fn(OutputLine) + Send + Sync),
    ) -> Result<ExecutionResult, RuntimeError>;
}

pub struct SystemRunner {
    drain_grace: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        request: &ExecutionRequest,
        on_line: &(dyn Fn(OutputLine) + Send + Sync),
    ) -> Result<ExecutionResult, RuntimeError> {
        let mut cmd = Command::new(request.program());
        cmd.args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = request.working_dir() {
            cmd.current_dir(dir);
        }
        // Own process group, so a timeout can take down everything the
        // script started, not only the interpreter.
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| launch_error(request.program(), &e))?;
        let _group = ActiveGroup::register(child.id());
        debug!(
            pid = child.id(),
            "spawned {}",
            request.display_command()
        );

        let stdout = child.stdout.take().ok_or_else(|| RuntimeError::Launch {
            path: request.program().to_path_buf(),
            reason: "stdout was not captured".to_owned(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| RuntimeError::Launch {
            path: request.program().to_path_buf(),
            reason: "stderr was not captured".to_owned(),
        })?;

        let deadline = request.timeout().map(|limit| Instant::now() + limit);
        let exited = pump_output(
            &mut child,
            LineReader::new(BufReader::new(stdout)),
            LineReader::new(BufReader::new(stderr)),
            on_line,
            deadline,
            self.drain_grace,
        )
        .await?;

        match exited {
            Some(status) => {
                let code = exit_code(status);
                debug!("{} exited with code {code}", request.program().display());
                Ok(ExecutionResult::exited(code))
            }
            None => {
                warn!(
                    "{} exceeded its timeout of {:?}, killing",
                    request.program().display(),
                    request.timeout().unwrap_or_default()
                );
                terminate(&mut child).await?;
                Ok(ExecutionResult::timeout())
            }
        }
    }
}

/// Relay output until the child has exited and both pipes are closed, or
/// the drain grace after exit runs out. Returns `None` when `deadline`
/// passes before the child exits. The deadline does not apply once the
/// exit status is known.
async fn pump_output<O, E>(
    child: &mut Child,
    mut stdout: LineReader<O>,
    mut stderr: LineReader<E>,
    on_line: &(dyn Fn(OutputLine) + Send + Sync),
    deadline: Option<Instant>,
    drain_grace: Duration,
) -> Result<Option<ExitStatus>, RuntimeError>
where
    O: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
{
    let mut out_open = true;
    let mut err_open = true;
    let mut status: Option<ExitStatus> = None;
    let mut drain_deadline: Option<Instant> = None;

    loop {
        if let Some(status) = status {
            if !out_open && !err_open {
                return Ok(Some(status));
            }
        }

        tokio::select! {
            line = stdout.next_line(), if out_open => {
                out_open = deliver(line, OutputStream::Stdout, on_line);
            }
            line = stderr.next_line(), if err_open => {
                err_open = deliver(line, OutputStream::Stderr, on_line);
            }
            exited = child.wait(), if status.is_none() => {
                status = Some(exited?);
                drain_deadline = Some(Instant::now() + drain_grace);
            }
            () = sleep_until_opt(deadline), if status.is_none() => {
                return Ok(None);
            }
            () = sleep_until_opt(drain_deadline), if status.is_some() => {
                debug!("output pipes still open after exit, detaching");
                return Ok(status);
            }
        }
    }
}

/// Forward one read result. Returns whether the stream is still open.
fn deliver(
    line: std::io::Result<Option<String>>,
    stream: OutputStream,
    on_line: &(dyn Fn(OutputLine) + Send + Sync),
) -> bool {
    match line {
        Ok(Some(text)) => {
            if !text.trim().is_empty() {
                on_line(OutputLine { stream, text });
            }
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!("failed to read child {stream:?}: {e}");
            false
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Newline-delimited reader that tolerates non-UTF-8 output.
///
/// Partial lines stay in `buf` if a read is cancelled by `select!`, so no
/// output is lost between polls.
struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\n', '\r'])
            .to_owned();
        self.buf.clear();
        Ok(Some(line))
    }
}

async fn terminate(child: &mut Child) -> Result<(), RuntimeError> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            kill_process_group(pid);
        }
    }
    match child.kill().await {
        Ok(()) => Ok(()),
        // Already reaped.
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(RuntimeError::Io(e)),
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill() has no memory-safety preconditions. The child was
    // spawned as leader of its own group, so -pgid only targets that group.
    let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if ret != 0 {
        debug!(
            "killpg({pgid}) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Exit code with the shell convention for signal deaths (128 + signo).
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    -1
}

fn launch_error(program: &Path, e: &std::io::Error) -> RuntimeError {
    let reason = match e.kind() {
        std::io::ErrorKind::NotFound => "executable not found".to_owned(),
        std::io::ErrorKind::PermissionDenied => "permission denied".to_owned(),
        _ => e.to_string(),
    };
    RuntimeError::Launch {
        path: program.to_path_buf(),
        reason,
    }
}
