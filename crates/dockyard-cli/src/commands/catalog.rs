use super::{colorize_status, core_err, json_pretty, Session, EXIT_SUCCESS};

pub fn run(session: &Session, json: bool) -> Result<u8, String> {
    let entries = session.orchestrator().catalog().map_err(|e| core_err(&e))?;
    if json {
        let payload: Vec<_> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "built": e.built,
                    "status": e.status(),
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else if entries.is_empty() {
        println!(
            "no Dockerfiles found in {}",
            session.config().catalog.dockerfiles_dir.display()
        );
    } else {
        println!("{:<24} STATUS", "NAME");
        for entry in &entries {
            println!("{:<24} {}", entry.name, colorize_status(entry.status()));
        }
    }
    Ok(EXIT_SUCCESS)
}
