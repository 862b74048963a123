use super::{Session, EXIT_FAILURE, EXIT_SUCCESS};
use dockyard_core::OutputLock;
use dockyard_runtime::{check_environment_prereqs, skip_requested, PrivilegeGate, SystemGate};
use dockyard_schema::DockyardConfig;

pub fn run(session: &Session, json_output: bool) -> Result<u8, String> {
    let config = session.config();
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(config, &mut checks, &mut all_pass);
    check_elevation(config, &mut checks);
    check_catalog(config, &mut checks, &mut all_pass);

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(config: &DockyardConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = check_environment_prereqs(config);
    if missing.is_empty() {
        checks.push(Check::pass(
            "prereqs",
            "Interpreter, scripts, and builder are present",
        ));
        return;
    }
    *all_pass = false;
    for m in &missing {
        checks.push(Check::fail(
            "prereqs",
            &format!("{} missing: {} (install: {})", m.name, m.purpose, m.install_hint),
        ));
    }
}

fn check_elevation(config: &DockyardConfig, checks: &mut Vec<Check>) {
    if skip_requested() {
        checks.push(Check::info(
            "elevation",
            "Privilege elevation disabled by DOCKYARD_SKIP_ELEVATION",
        ));
        return;
    }
    let gate = SystemGate::new(config.elevation.command.clone());
    if gate.is_elevated() {
        checks.push(Check::pass("elevation", "Running with administrative privileges"));
    } else if let Some(program) = config.elevation.command.first() {
        checks.push(Check::warn(
            "elevation",
            &format!("Not elevated; up/build/teardown will relaunch through {program}"),
        ));
    } else {
        checks.push(Check::warn(
            "elevation",
            "Not elevated and no elevation command configured",
        ));
    }
}

fn check_catalog(config: &DockyardConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let catalog = &config.catalog;
    if catalog.dockerfiles_dir.is_dir() {
        checks.push(Check::pass(
            "catalog",
            &format!("Catalog directory {}", catalog.dockerfiles_dir.display()),
        ));
    } else {
        checks.push(Check::info(
            "catalog",
            &format!(
                "Catalog directory {} does not exist",
                catalog.dockerfiles_dir.display()
            ),
        ));
    }

    if !catalog.output_dir.is_dir() {
        return;
    }
    // A held lock means another build is writing to this output directory.
    let probe = catalog.output_dir.join(".dockyard-doctor");
    match OutputLock::try_acquire(&probe) {
        Ok(Some(lock)) => {
            let path = lock.path().to_path_buf();
            drop(lock);
            let _ = std::fs::remove_file(path);
            checks.push(Check::pass("output_dir", "Output directory is writable"));
        }
        Ok(None) => checks.push(Check::warn(
            "output_dir",
            "Another doctor run holds the output directory probe",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "output_dir",
                &format!("Output directory is not writable: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Dockyard Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
