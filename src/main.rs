mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use guardian::GuardianConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = GuardianConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => GuardianConfig::load()?,
    };

    init_tracing(&config);

    match cli.command {
        Commands::Run {
            services,
            timeout,
            follow,
        } => commands::run::cmd_run(config, services, timeout, follow).await?,
        Commands::Config => commands::config::cmd_config(&config)?,
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(config: &GuardianConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
