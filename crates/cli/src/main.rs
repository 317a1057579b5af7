mod cli;
mod commands;
mod input;

use anyhow::{Context, Result};
use clap::Parser;

use kpi_core::config::{load_dotenv, Config};

use crate::cli::{CliArgs, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    load_dotenv();

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    config.log_summary();

    let output = match args.command {
        Command::Metrics {
            users,
            owner,
            compare,
            metric,
        } => commands::metrics(
            &config,
            users.as_deref(),
            owner.as_deref(),
            compare.as_deref(),
            metric.as_deref(),
            args.json,
        )?,
        Command::Segments { users, by } => {
            commands::segments(&config, users.as_deref(), by, args.json)?
        }
        Command::Decompose {
            period1,
            period2,
            label1,
            label2,
        } => commands::decompose(&config, &period1, &period2, &label1, &label2, args.json)?,
        Command::Quality {
            users,
            outliers,
            method,
            threshold,
        } => commands::quality(
            &config,
            users.as_deref(),
            outliers.as_deref(),
            method,
            threshold,
            args.json,
        )?,
    };

    println!("{}", output);
    Ok(())
}
