mod cli;
mod helpers;
mod policy;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    setup_subscriber();

    let cli = Cli::parse();
    match cli.command {
        crate::cli::Commands::Policy(policy_commands) => policy::run(policy_commands)?,
        crate::cli::Commands::Inspect { file } => helpers::run(file)?,
    };
    Ok(())
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bramble_cni_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
