use dockyard_schema::{DockyardConfig, ScriptKind};
use std::fmt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: String,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A bare name is looked up on PATH; anything with a separator must exist.
fn program_available(program: &Path) -> bool {
    if program.components().count() > 1 {
        program.is_file()
    } else {
        command_exists(&program.to_string_lossy())
    }
}

/// Check everything environment setup and builds depend on.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_environment_prereqs(config: &DockyardConfig) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !program_available(&config.scripts.interpreter) {
        missing.push(MissingPrereq {
            name: config.scripts.interpreter.display().to_string(),
            purpose: "interpreter for the environment scripts",
            install_hint: "install it or set scripts.interpreter in dockyard.toml".to_owned(),
        });
    }

    for kind in ScriptKind::ALL {
        let path = config.scripts.script_path(kind);
        if !path.is_file() {
            missing.push(MissingPrereq {
                name: path.display().to_string(),
                purpose: match kind {
                    ScriptKind::InstallRuntime => "installs and starts the container runtime",
                    ScriptKind::InstallBuilder => "installs and starts the image builder",
                    ScriptKind::Uninstall => "stops and removes runtime and builder",
                },
                install_hint: format!("place the {kind} script in {}", config.scripts.dir.display()),
            });
        }
    }

    if !program_available(&config.builder.executable) {
        missing.push(MissingPrereq {
            name: config.builder.executable.display().to_string(),
            purpose: "image builder client (buildctl)",
            install_hint: "installed by the install-builder script, or set builder.executable"
                .to_owned(),
        });
    }

    missing
}
