mod cli;
mod commands;
mod observability;
mod output;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use octofhir_access::AccessConfig;
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    observability::init_tracing_with_level(&cli.log_level);
    if cli.verbose {
        observability::enable_verbose();
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Checkers => commands::checkers::list(&config)?,
        Commands::Check(args) => {
            let granted = commands::check::run(config, args).await?;
            if !granted {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AccessConfig> {
    match path {
        Some(path) => AccessConfig::load(path)
            .with_context(|| format!("Failed to load access config from {}", path.display())),
        None => {
            let mut config = AccessConfig::default();
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config.validate()?;
            Ok(config)
        }
    }
}
