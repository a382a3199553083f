//! Rancher service autoscale monitor
//!
//! Polls cAdvisor for every container of a Rancher service and watches the
//! service's scale, exiting once the scale changes.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rancher service autoscale monitor
#[derive(Parser)]
#[command(name = "autoscale")]
#[command(author, version, about = "Rancher service autoscale monitor", long_about = None)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines (default)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor a service's containers until its scale changes
    Service(commands::service::ServiceArgs),
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // Tables go to stdout, logs to stderr
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = config::Settings::load()?;
    info!(
        metadata_url = %settings.metadata_url,
        cadvisor_port = settings.cadvisor_port,
        "Starting autoscale"
    );

    match cli.command {
        Commands::Service(args) => commands::service::run(args, &settings).await,
    }
}
