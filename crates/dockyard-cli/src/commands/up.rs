use super::{core_err, json_pretty, spin_fail, spin_ok, spinner, Session, EXIT_SUCCESS};
use dockyard_core::shutdown_requested;
use std::time::Duration;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

pub fn run(session: &Session, json: bool) -> Result<u8, String> {
    let orch = session.orchestrator();
    let pb = if json {
        None
    } else {
        Some(spinner("provisioning build environment..."))
    };
    let observer = pb.as_ref().map(|pb| session.attach_progress(pb));

    let setup = session.block_on(async {
        orch.setup().await?;
        orch.wait_ready().await;
        Ok::<_, dockyard_core::CoreError>(())
    });
    if let Some(id) = observer {
        session.detach(id);
    }

    match &setup {
        Ok(()) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "build environment ready");
            }
            if !json {
                println!("press Ctrl-C to tear down the environment");
            }
            session.block_on(async {
                while !shutdown_requested() {
                    tokio::time::sleep(SHUTDOWN_POLL).await;
                }
            });
        }
        Err(_) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "environment setup failed");
            }
        }
    }

    // Teardown is attempted whether or not setup succeeded.
    let teardown = session.block_on(orch.teardown());

    if json {
        let payload = serde_json::json!({
            "ready": orch.manager().is_ready(),
            "phase": orch.manager().phase(),
            "setup_error": setup.as_ref().err().map(ToString::to_string),
            "teardown_error": teardown.as_ref().err().map(ToString::to_string),
            "log_tail": session.log_tail(),
        });
        println!("{}", json_pretty(&payload)?);
    } else if teardown.is_ok() {
        println!("environment torn down");
    }

    setup.map_err(|e| core_err(&e))?;
    teardown.map_err(|e| core_err(&e))?;
    Ok(EXIT_SUCCESS)
}
