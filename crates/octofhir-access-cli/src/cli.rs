use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

#[derive(Parser)]
#[command(name = "octofhir-access")]
#[command(about = "Inspect and dry-run OctoFHIR access checkers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Gateway config file with an [access] table
    #[arg(short, long, global = true, env = "OCTOFHIR_ACCESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level filter (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Log access-checker internals at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered access checkers
    Checkers,
    /// Evaluate one request against the configured checker
    Check(CheckArgs),
}

#[derive(clap::Args)]
pub struct CheckArgs {
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Request path relative to the FHIR base (e.g. "Observation?patient=123")
    pub url: String,

    /// Token claims as inline JSON or a path to a JSON file
    #[arg(long, default_value = "{}")]
    pub claims: String,

    /// JSON request body file
    #[arg(short, long)]
    pub body: Option<PathBuf>,

    /// Checker name (overrides config)
    #[arg(long)]
    pub checker: Option<String>,

    /// Backend FHIR base URL (overrides config)
    #[arg(long)]
    pub backend: Option<Url>,
}
