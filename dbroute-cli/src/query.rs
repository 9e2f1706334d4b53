use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use dbroute_core::QueryRouter;
use serde::Serialize;
use tracing::info;

use crate::config::load_config;

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// SQL to execute, sent to the database unchanged ("-" reads stdin)
    pub query: String,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,
}

pub async fn run_read(args: QueryArgs, config_path: Option<&Path>) -> Result<()> {
    let sql = resolve_query(&args.query)?;
    let router = connect(config_path).await?;

    let result = router.read(&sql).await;
    router.close().await;
    let records = result.context("read query failed")?;

    info!(rows = records.len(), "read complete");
    print_json(&records, args.pretty)
}

pub async fn run_write(args: QueryArgs, config_path: Option<&Path>) -> Result<()> {
    let sql = resolve_query(&args.query)?;
    let router = connect(config_path).await?;

    let result = router.write(&sql).await;
    router.close().await;
    let summary = result.context("write query failed")?;

    info!(rows_affected = summary.rows_affected, "write complete");
    print_json(&summary, args.pretty)
}

async fn connect(config_path: Option<&Path>) -> Result<QueryRouter> {
    let config = load_config(config_path)?;
    QueryRouter::connect(config)
        .await
        .context("failed to set up query router")
}

fn resolve_query(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }

    let mut sql = String::new();
    std::io::stdin()
        .read_to_string(&mut sql)
        .context("failed to read query from stdin")?;
    Ok(sql)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", rendered);
    Ok(())
}
