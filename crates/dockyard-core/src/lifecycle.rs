use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Where the environment manager is in its one-shot lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "phase", content = "reason")]
pub enum EnvPhase {
    NotStarted,
    AwaitingPrivilege,
    InstallingRuntime,
    InstallingBuilder,
    Ready,
    Failed(String),
    Stopping,
    Stopped,
}

impl EnvPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnvPhase::Stopped)
    }
}

impl fmt::Display for EnvPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvPhase::NotStarted => write!(f, "not-started"),
            EnvPhase::AwaitingPrivilege => write!(f, "awaiting-privilege"),
            EnvPhase::InstallingRuntime => write!(f, "installing-runtime"),
            EnvPhase::InstallingBuilder => write!(f, "installing-builder"),
            EnvPhase::Ready => write!(f, "ready"),
            EnvPhase::Failed(_) => write!(f, "failed"),
            EnvPhase::Stopping => write!(f, "stopping"),
            EnvPhase::Stopped => write!(f, "stopped"),
        }
    }
}

pub fn validate_transition(from: &EnvPhase, to: &EnvPhase) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (EnvPhase::NotStarted, EnvPhase::AwaitingPrivilege)
            | (EnvPhase::AwaitingPrivilege, EnvPhase::InstallingRuntime)
            | (EnvPhase::InstallingRuntime, EnvPhase::InstallingBuilder)
            | (EnvPhase::InstallingBuilder, EnvPhase::Ready)
            | (
                EnvPhase::NotStarted
                    | EnvPhase::AwaitingPrivilege
                    | EnvPhase::InstallingRuntime
                    | EnvPhase::InstallingBuilder
                    | EnvPhase::Stopping,
                EnvPhase::Failed(_)
            )
            | (
                EnvPhase::NotStarted | EnvPhase::Ready | EnvPhase::Failed(_),
                EnvPhase::Stopping
            )
            | (EnvPhase::Stopping, EnvPhase::Stopped)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
