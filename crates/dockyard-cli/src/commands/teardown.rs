use super::{core_err, json_pretty, spin_fail, spin_ok, spinner, Session, EXIT_SUCCESS};

pub fn run(session: &Session, json: bool) -> Result<u8, String> {
    let orch = session.orchestrator();
    let pb = if json {
        None
    } else {
        Some(spinner("tearing down build environment..."))
    };
    let observer = pb.as_ref().map(|pb| session.attach_progress(pb));

    let result = session.block_on(orch.teardown());
    if let Some(id) = observer {
        session.detach(id);
    }

    match result {
        Ok(()) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "environment torn down");
            }
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "teardown failed");
            }
            return Err(core_err(&e));
        }
    }

    if json {
        let payload = serde_json::json!({
            "phase": orch.manager().phase(),
            "log_tail": session.log_tail(),
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
