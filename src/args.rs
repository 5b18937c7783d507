use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "guardian")]
#[command(version)]
#[command(about = "Local supervisor for companion daemons", long_about = None)]
pub(crate) struct Cli {
    /// Config file to use instead of $GUARDIAN_CONFIG_DIR/guardian.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start services and supervise them until Ctrl+C
    Run {
        /// Services to start (all registered services if omitted)
        services: Vec<String>,

        /// Seconds to wait for each process to prove it is alive
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print live output of the started services
        #[arg(short = 'f', long)]
        follow: bool,
    },

    /// Print the effective configuration
    Config,
}
