use super::{core_err, json_pretty, spin_fail, spin_ok, spinner, Session, EXIT_SUCCESS};
use dockyard_core::CoreError;
use dockyard_schema::BuildJob;
use std::path::PathBuf;

/// What to build: a catalog entry by name, or explicit paths.
#[derive(Debug)]
pub enum BuildTarget {
    Catalog(String),
    Paths {
        name: String,
        dockerfile: PathBuf,
        context: PathBuf,
        output: PathBuf,
    },
}

impl BuildTarget {
    fn job(&self, session: &Session) -> Result<BuildJob, CoreError> {
        match self {
            BuildTarget::Catalog(name) => session.orchestrator().job_for(name),
            BuildTarget::Paths {
                name,
                dockerfile,
                context,
                output,
            } => Ok(BuildJob::new(name, dockerfile, context, output)?),
        }
    }
}

pub fn run(session: &Session, target: &BuildTarget, json: bool) -> Result<u8, String> {
    // Rejected jobs never touch the environment.
    let job = target.job(session).map_err(|e| core_err(&e))?;
    let orch = session.orchestrator();

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("building container '{}'...", job.name())))
    };
    let observer = pb.as_ref().map(|pb| session.attach_progress(pb));
    let result = session.block_on(orch.build_session(&job));
    if let Some(id) = observer {
        session.detach(id);
    }

    let report = match result {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("container '{}' built", r.name));
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "build failed");
            }
            return Err(core_err(&e));
        }
    };

    if json {
        let payload = serde_json::json!({
            "name": report.name,
            "status": "built",
            "archive": report.archive,
            "files_packaged": report.files_packaged,
            "output": report.output,
            "duration_ms": report.duration_ms,
            "log_tail": session.log_tail(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("built container '{}'", report.name);
        println!("output: {}", report.output.display());
    }
    Ok(EXIT_SUCCESS)
}
