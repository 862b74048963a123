mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{
    build::BuildTarget, Session, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_VALIDATION_ERROR,
};
use dockyard_core::install_signal_handler;
use dockyard_runtime::{
    ensure_elevated, skip_requested, Elevation, PrivilegeGate, SkippedGate, SystemGate,
};
use dockyard_schema::DockyardConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "dockyard",
    version,
    about = "Provision a local container-build environment and build OCI images"
)]
struct Cli {
    /// Path to the dockyard.toml configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install and start the container runtime and image builder, then hold
    /// until Ctrl-C and tear everything down.
    Up,
    /// Build one image: provision, build, tear down.
    Build {
        /// Container name (a directory in the catalog unless paths are given).
        name: String,
        /// Dockerfile to build instead of the catalog entry.
        #[arg(long, requires_all = ["context", "output"])]
        dockerfile: Option<PathBuf>,
        /// Build context directory.
        #[arg(long, requires = "dockerfile")]
        context: Option<PathBuf>,
        /// OCI output destination.
        #[arg(long, requires = "dockerfile")]
        output: Option<PathBuf>,
    },
    /// Stop and remove the container runtime and image builder.
    Teardown,
    /// List catalog entries and whether each has been built.
    Catalog,
    /// Check scripts, builder, interpreter, and elevation.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

impl Commands {
    fn needs_privilege(&self) -> bool {
        matches!(
            self,
            Commands::Up | Commands::Build { .. } | Commands::Teardown
        )
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            return exit_with(commands::completions::run::<Cli>(shell));
        }
        Commands::ManPages { ref dir } => return exit_with(commands::man_pages::run::<Cli>(dir)),
        _ => {}
    }

    let config = match DockyardConfig::discover(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: config error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(e) = init_tracing(&cli, config.log.log_dir()) {
        eprintln!("error: {e}");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    // Nothing else is constructed until elevation is settled.
    let gate: Arc<dyn PrivilegeGate> = if cli.command.needs_privilege() {
        match bootstrap_privilege(&config) {
            Ok(gate) => gate,
            Err(code) => return ExitCode::from(code),
        }
    } else {
        Arc::new(SystemGate::new(config.elevation.command.clone()))
    };

    install_signal_handler();

    let json = cli.json;
    let result = Session::new(config, gate).and_then(|session| match cli.command {
        Commands::Up => commands::up::run(&session, json),
        Commands::Build {
            name,
            dockerfile,
            context,
            output,
        } => {
            let target = match (dockerfile, context, output) {
                (Some(dockerfile), Some(context), Some(output)) => BuildTarget::Paths {
                    name,
                    dockerfile,
                    context,
                    output,
                },
                _ => BuildTarget::Catalog(name),
            };
            commands::build::run(&session, &target, json)
        }
        Commands::Teardown => commands::teardown::run(&session, json),
        Commands::Catalog => commands::catalog::run(&session, json),
        Commands::Doctor => commands::doctor::run(&session, json),
        Commands::Completions { .. } | Commands::ManPages { .. } => Ok(commands::EXIT_SUCCESS),
    });

    exit_with(result)
}

fn exit_with(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(commands::exit_code_for(&msg))
        }
    }
}

/// Elevate before anything else runs. `Err` carries the exit code this
/// instance must leave with.
fn bootstrap_privilege(config: &DockyardConfig) -> Result<Arc<dyn PrivilegeGate>, u8> {
    if skip_requested() {
        tracing::debug!("privilege elevation disabled by environment");
        return Ok(Arc::new(SkippedGate));
    }
    let gate = SystemGate::new(config.elevation.command.clone());
    match ensure_elevated(&gate) {
        Elevation::AlreadyElevated => Ok(Arc::new(gate)),
        Elevation::Relaunched { exit_code } => {
            tracing::debug!("elevated instance exited with {exit_code}");
            Err(u8::try_from(exit_code).unwrap_or(EXIT_FAILURE))
        }
        Elevation::Denied { reason } => {
            eprintln!("error: privilege error: {reason}");
            Err(EXIT_FAILURE)
        }
    }
}

fn init_tracing(cli: &Cli, log_dir: Option<&Path>) -> Result<(), String> {
    // Operator log lines are shown through the progress display, so the
    // console layer hides them unless asked for debug output.
    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn,dockyard::log=off"
    };
    let console_filter = EnvFilter::try_from_env("DOCKYARD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let file = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("failed to create log dir {}: {e}", dir.display()))?;
            let name = format!(
                "log-{}.txt",
                chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
            );
            let path = dir.join(name);
            let handle = std::fs::File::create(&path)
                .map_err(|e| format!("failed to create log file {}: {e}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(handle))
                    .with_filter(EnvFilter::new("info")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Ok(())
}
