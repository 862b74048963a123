use crate::lifecycle::{validate_transition, EnvPhase};
use crate::logsink::LogFanout;
use crate::readiness::Readiness;
use crate::CoreError;
use dockyard_runtime::{PrivilegeGate, ProcessRunner};
use dockyard_schema::{ExecutionRequest, ScriptKind, ScriptsSection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Provisions and tears down the local container runtime and image builder.
///
/// Setup runs the runtime install script, then the builder install script,
/// and flips the shared readiness flag once both succeed. It is accepted
/// once per manager. Teardown runs the uninstall script at most once and
/// always waits for an in-flight setup to finish first.
pub struct EnvironmentManager {
    scripts: ScriptsSection,
    runner: Arc<dyn ProcessRunner>,
    gate: Arc<dyn PrivilegeGate>,
    log: Arc<LogFanout>,
    readiness: Readiness,
    phase: Mutex<EnvPhase>,
    /// Orders setup and teardown; held for the whole operation.
    op_lock: tokio::sync::Mutex<()>,
    teardown_attempted: AtomicBool,
}

impl EnvironmentManager {
    pub fn new(
        scripts: ScriptsSection,
        runner: Arc<dyn ProcessRunner>,
        gate: Arc<dyn PrivilegeGate>,
        log: Arc<LogFanout>,
    ) -> Self {
        Self {
            scripts,
            runner,
            gate,
            log,
            readiness: Readiness::new(),
            phase: Mutex::new(EnvPhase::NotStarted),
            op_lock: tokio::sync::Mutex::new(()),
            teardown_attempted: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> EnvPhase {
        self.phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// Install and start the runtime, then the builder.
    ///
    /// Every failure is reported through the log sink before it is returned.
    pub async fn setup(&self) -> Result<(), CoreError> {
        let _op = self.op_lock.lock().await;
        let result = self.run_setup().await;
        if let Err(e) = &result {
            self.log.error(format!("Error setting up environment: {e}"));
            self.fail(e);
        }
        result
    }

    async fn run_setup(&self) -> Result<(), CoreError> {
        self.transition(EnvPhase::AwaitingPrivilege)?;
        if !self.gate.is_elevated() {
            return Err(CoreError::Privilege(
                "environment setup requires administrative privileges".to_owned(),
            ));
        }

        // Both scripts must exist before anything is launched.
        self.script_request(ScriptKind::InstallRuntime)?;
        self.script_request(ScriptKind::InstallBuilder)?;

        self.transition(EnvPhase::InstallingRuntime)?;
        self.log.info("Starting container runtime setup...");
        self.run_script(ScriptKind::InstallRuntime).await?;

        self.transition(EnvPhase::InstallingBuilder)?;
        self.log.info("Starting image builder setup...");
        self.run_script(ScriptKind::InstallBuilder).await?;

        self.transition(EnvPhase::Ready)?;
        self.readiness.mark_ready();
        self.log.info("Environment setup completed successfully.");
        Ok(())
    }

    /// Stop and remove the runtime and builder.
    ///
    /// Only the first call does anything; later calls return `Ok(())`
    /// immediately. Safe to call whether or not setup ran or succeeded.
    pub async fn teardown(&self) -> Result<(), CoreError> {
        if self.teardown_attempted.swap(true, Ordering::SeqCst) {
            debug!("teardown already attempted, skipping");
            return Ok(());
        }
        let _op = self.op_lock.lock().await;
        let result = self.run_teardown().await;
        if let Err(e) = &result {
            self.log.error(format!("Error tearing down environment: {e}"));
            self.fail(e);
        }
        result
    }

    async fn run_teardown(&self) -> Result<(), CoreError> {
        self.transition(EnvPhase::Stopping)?;
        self.log.info("Stopping container runtime and image builder...");
        self.run_script(ScriptKind::Uninstall).await?;
        self.transition(EnvPhase::Stopped)?;
        self.log.info("Environment teardown completed.");
        Ok(())
    }

    fn script_request(&self, kind: ScriptKind) -> Result<ExecutionRequest, CoreError> {
        let path = self.scripts.script_path(kind);
        if !path.is_file() {
            return Err(CoreError::ScriptNotFound(path));
        }
        Ok(ExecutionRequest::new(&self.scripts.interpreter)
            .with_args(self.scripts.interpreter_args.iter().cloned())
            .with_arg(path.to_string_lossy())
            .with_timeout(Some(self.scripts.timeout())))
    }

    async fn run_script(&self, kind: ScriptKind) -> Result<(), CoreError> {
        let request = self.script_request(kind)?;
        let program = self.scripts.script_path(kind).display().to_string();
        debug!("running {kind} script: {}", request.display_command());

        let log = &self.log;
        let result = self
            .runner
            .run(&request, &|line| log.relay(line))
            .await?;

        if result.timed_out {
            return Err(CoreError::Timeout {
                program,
                after: self.scripts.timeout(),
            });
        }
        match result.exit_code {
            Some(0) => Ok(()),
            Some(code) => Err(CoreError::NonZeroExit { program, code }),
            None => Err(CoreError::NonZeroExit { program, code: -1 }),
        }
    }

    fn transition(&self, to: EnvPhase) -> Result<(), CoreError> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        validate_transition(&phase, &to)?;
        debug!("environment phase {phase} -> {to}");
        *phase = to;
        Ok(())
    }

    /// Record a failure unless the current phase cannot fail (already
    /// ready, or stopped).
    fn fail(&self, err: &CoreError) {
        let failed = EnvPhase::Failed(err.to_string());
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if validate_transition(&phase, &failed).is_ok() {
            debug!("environment phase {phase} -> {failed}");
            *phase = failed;
        }
    }
}
