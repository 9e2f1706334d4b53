//! dbroute CLI - run SQL against a replicated database cluster
//!
//! Reads go to the pooled read endpoint, writes go to the primary node.
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod config;
mod query;
mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "dbroute",
    author,
    version,
    about = "Route SQL reads to the replica pool and writes to the primary",
    long_about = "Run raw SQL against a database cluster. Read queries borrow a connection \
                  from the shared pool on the read endpoint; write queries open a dedicated \
                  connection to the primary node and close it afterwards."
)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    /// Export traces over OTLP (requires the telemetry feature)
    #[arg(long, global = true)]
    otel: bool,

    /// Config file to use instead of ./dbroute.toml and ~/.dbroute/config.toml
    #[arg(long, global = true, value_name = "PATH", env = "DBROUTE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a read query on the shared pool and print the rows as JSON
    Read(query::QueryArgs),
    /// Run a write query on the primary and print the outcome as JSON
    Write(query::QueryArgs),
    /// Inspect and validate the effective configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env may carry RUST_LOG and OTEL_* settings, so it goes first
    dbroute_core::load_dotenv();
    if let Err(err) = tracing_setup::init(&tracing_setup::TracingConfig {
        debug: cli.debug,
        otel: cli.otel,
    }) {
        eprintln!("warning: logging disabled: {err:#}");
    }

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Read(args) => query::run_read(args, config_path).await,
        Commands::Write(args) => query::run_write(args, config_path).await,
        Commands::Config(args) => config::run_config(args, config_path),
    };

    tracing_setup::shutdown_otel();
    result
}
