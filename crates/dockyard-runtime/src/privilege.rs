use crate::RuntimeError;
use tracing::{info, warn};

/// Set in the environment of an elevated relaunch.
pub const ELEVATED_MARKER_ENV: &str = "DOCKYARD_ELEVATED";
/// `1` disables the privilege gate entirely (tests, rootless hosts).
pub const SKIP_ELEVATION_ENV: &str = "DOCKYARD_SKIP_ELEVATION";

/// Outcome of the privilege bootstrap.
///
/// Only `AlreadyElevated` allows startup to continue. After `Relaunched` the
/// elevated copy has already done the work and this instance must exit with
/// `exit_code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elevation {
    AlreadyElevated,
    Relaunched { exit_code: i32 },
    Denied { reason: String },
}

pub trait PrivilegeGate: Send + Sync {
    fn is_elevated(&self) -> bool;

    /// Whether this instance is itself the product of a relaunch.
    fn is_relaunch(&self) -> bool;

    /// Start an elevated copy of the running program with the same arguments
    /// and wait for it. Returns the copy's exit code.
    fn relaunch_elevated(&self) -> Result<i32, RuntimeError>;
}

/// Elevate the process or explain why it cannot be.
pub fn ensure_elevated(gate: &dyn PrivilegeGate) -> Elevation {
    if gate.is_elevated() {
        return Elevation::AlreadyElevated;
    }
    if gate.is_relaunch() {
        return Elevation::Denied {
            reason: "relaunched instance is still not elevated".to_owned(),
        };
    }
    match gate.relaunch_elevated() {
        Ok(exit_code) => Elevation::Relaunched { exit_code },
        Err(e) => {
            warn!("elevated relaunch failed: {e}");
            Elevation::Denied {
                reason: e.to_string(),
            }
        }
    }
}

pub fn skip_requested() -> bool {
    std::env::var(SKIP_ELEVATION_ENV).as_deref() == Ok("1")
}

/// Gate backed by the host: effective uid 0 counts as elevated, and relaunch
/// goes through an escalation command such as `sudo`.
pub struct SystemGate {
    escalation: Vec<String>,
}

impl SystemGate {
    pub fn new(escalation: Vec<String>) -> Self {
        Self { escalation }
    }
}

impl PrivilegeGate for SystemGate {
    fn is_elevated(&self) -> bool {
        is_effective_root()
    }

    fn is_relaunch(&self) -> bool {
        std::env::var(ELEVATED_MARKER_ENV).as_deref() == Ok("1")
    }

    fn relaunch_elevated(&self) -> Result<i32, RuntimeError> {
        let (program, flags) = self.escalation.split_first().ok_or_else(|| {
            RuntimeError::Privilege("no escalation command configured".to_owned())
        })?;
        let exe = std::env::current_exe()?;

        // Authenticate with a no-op first, so a declined prompt is told apart
        // from the relaunched program failing on its own.
        let auth = std::process::Command::new(program)
            .args(flags)
            .arg("true")
            .status()
            .map_err(|e| RuntimeError::Privilege(format!("cannot start {program}: {e}")))?;
        if !auth.success() {
            return Err(RuntimeError::Privilege(match auth.code() {
                Some(code) => {
                    format!("authorization through {program} was denied (exit code {code})")
                }
                None => format!("authorization through {program} was interrupted"),
            }));
        }

        info!("relaunching {} via {program}", exe.display());
        let status = std::process::Command::new(program)
            .args(flags)
            .arg(&exe)
            .args(std::env::args_os().skip(1))
            .env(ELEVATED_MARKER_ENV, "1")
            .status()
            .map_err(|e| RuntimeError::Privilege(format!("cannot start {program}: {e}")))?;

        Ok(status.code().unwrap_or(1))
    }
}

/// Gate installed when elevation is switched off with `DOCKYARD_SKIP_ELEVATION=1`.
/// Reports the process as elevated and never relaunches.
pub struct SkippedGate;

impl PrivilegeGate for SkippedGate {
    fn is_elevated(&self) -> bool {
        true
    }

    fn is_relaunch(&self) -> bool {
        false
    }

    fn relaunch_elevated(&self) -> Result<i32, RuntimeError> {
        Err(RuntimeError::Privilege(
            "elevation is disabled for this process".to_owned(),
        ))
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn is_effective_root() -> bool {
    // SAFETY: geteuid() takes no arguments and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_effective_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGate;

    #[test]
    fn elevated_process_continues() {
        let gate = MockGate::elevated();
        assert_eq!(ensure_elevated(&gate), Elevation::AlreadyElevated);
        assert_eq!(gate.relaunch_count(), 0);
    }

    #[test]
    fn unelevated_process_relaunches() {
        let gate = MockGate::unelevated(Ok(0));
        assert_eq!(
            ensure_elevated(&gate),
            Elevation::Relaunched { exit_code: 0 }
        );
        assert_eq!(gate.relaunch_count(), 1);
    }

    #[test]
    fn relaunch_exit_code_is_passed_through() {
        let gate = MockGate::unelevated(Ok(4));
        assert_eq!(
            ensure_elevated(&gate),
            Elevation::Relaunched { exit_code: 4 }
        );
    }

    #[test]
    fn failed_escalation_is_denied() {
        let gate = MockGate::unelevated(Err("sudo not installed".to_owned()));
        match ensure_elevated(&gate) {
            Elevation::Denied { reason } => assert!(reason.contains("sudo not installed")),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn relaunched_but_unelevated_does_not_loop() {
        let gate = MockGate::unelevated(Ok(0)).as_relaunch();
        assert!(matches!(ensure_elevated(&gate), Elevation::Denied { .. }));
        assert_eq!(gate.relaunch_count(), 0);
    }

    #[test]
    fn skipped_gate_never_relaunches() {
        assert_eq!(ensure_elevated(&SkippedGate), Elevation::AlreadyElevated);
        assert!(SkippedGate.relaunch_elevated().is_err());
    }

    #[test]
    fn empty_escalation_command_is_an_error() {
        let gate = SystemGate::new(Vec::new());
        let err = gate.relaunch_elevated().unwrap_err();
        assert!(matches!(err, RuntimeError::Privilege(_)));
    }

    #[cfg(unix)]
    #[test]
    fn declined_authorization_is_denied() {
        // Stands in for a sudo whose password prompt was refused.
        let gate = SystemGate::new(["sh", "-c", "exit 1"].map(str::to_owned).to_vec());
        match gate.relaunch_elevated() {
            Err(RuntimeError::Privilege(reason)) => {
                assert!(reason.contains("denied"), "{reason}");
                assert!(reason.contains("exit code 1"), "{reason}");
            }
            other => panic!("expected privilege error, got {other:?}"),
        }
        if !gate.is_elevated() && !gate.is_relaunch() {
            assert!(matches!(ensure_elevated(&gate), Elevation::Denied { .. }));
        }
    }

    #[test]
    fn missing_escalation_program_is_an_error() {
        let gate = SystemGate::new(vec!["/nonexistent/dockyard-sudo".to_owned()]);
        let err = gate.relaunch_elevated().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dockyard-sudo"));
    }
}
