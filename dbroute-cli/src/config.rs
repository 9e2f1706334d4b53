use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbroute_core::config::{global_config_path, LOCAL_CONFIG_FILE};
use dbroute_core::DbConfig;

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective config as TOML (password masked)
    Show,
    /// Show which config files are consulted
    Path,
    /// Check the effective config and print the endpoints it routes to
    Validate,
}

/// Load from an explicit file, or search the standard locations
pub fn load_config(path: Option<&Path>) -> Result<DbConfig> {
    match path {
        Some(path) => DbConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => DbConfig::load().context("failed to load config"),
    }
}

pub fn run_config(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Show => run_show(config_path),
        ConfigCommands::Path => run_path(config_path),
        ConfigCommands::Validate => run_validate(config_path),
    }
}

fn run_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;

    let toml_str = toml::to_string_pretty(&config.redacted())
        .context("Failed to serialize config to TOML")?;

    println!("{}", toml_str);
    Ok(())
}

fn run_path(config_path: Option<&Path>) -> Result<()> {
    if let Some(path) = config_path {
        println!("{} (explicit)", path.display());
        return Ok(());
    }

    let candidates: Vec<PathBuf> = global_config_path()
        .into_iter()
        .chain(std::iter::once(PathBuf::from(LOCAL_CONFIG_FILE)))
        .collect();

    for path in candidates {
        let state = if path.exists() { "found" } else { "missing" };
        println!("{} ({})", path.display(), state);
    }
    Ok(())
}

fn run_validate(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("invalid configuration")?;

    // Render endpoints from the masked copy so credentials never reach the terminal
    let shown = config.redacted();
    let read_url = shown.read_url()?;
    let primary_url = shown.connection_url(&shown.primary_host)?;

    println!("✅ Configuration is valid");
    println!("   driver:  {}", shown.driver);
    println!("   reads:   {}", read_url);
    println!("   writes:  {}", primary_url);
    println!(
        "   pool:    max {} / min {}, acquire timeout {}s, on exhaustion: {:?}",
        shown.pool.max_connections,
        shown.pool.min_connections,
        shown.pool.acquire_timeout_secs,
        shown.pool.exhaustion
    );
    Ok(())
}
