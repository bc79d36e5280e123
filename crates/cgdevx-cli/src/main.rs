mod cmd;
mod output;
mod prompt;
mod wiring;

use clap::{Parser, Subcommand};
use cmd::{setup::SetupArgs, state::StateSubcommand, workload::WorkloadSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cgdevx",
    about = "Provision, inspect and tear down a CG DevX platform installation",
    version,
    propagate_version = true
)]
struct Cli {
    /// State directory (default: ~/.cgdevx)
    #[arg(long, global = true, env = "CGDEVX_HOME")]
    state_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Debug logging
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the platform, resuming after the last completed stage
    Setup(SetupArgs),

    /// Tear down everything setup created
    Destroy {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Onboard and remove application workloads
    Workload {
        #[command(subcommand)]
        subcommand: WorkloadSubcommand,
    },

    /// Inspect the persisted installation state
    State {
        #[command(subcommand)]
        subcommand: StateSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        match &cli.command {
            Commands::Setup(_) | Commands::Destroy { .. } | Commands::Workload { .. } => {
                tracing::Level::INFO
            }
            Commands::State { .. } => tracing::Level::WARN,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = cgdevx_core::paths::resolve_home(cli.state_dir.as_deref())
        .map_err(anyhow::Error::from)
        .and_then(|home| match cli.command {
            Commands::Setup(args) => cmd::setup::run(&home, args, cli.json),
            Commands::Destroy { yes } => cmd::destroy::run(&home, yes, cli.json),
            Commands::Workload { subcommand } => cmd::workload::run(&home, subcommand, cli.json),
            Commands::State { subcommand } => cmd::state::run(&home, subcommand, cli.json),
        });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
