use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use logger::init_tracing;

mod alerts;
mod config;
mod daemon;
mod retention;

use config::Config;

/// pulse probing service: runs the scheduler against the endpoint registry
#[derive(Parser, Debug)]
#[command(name = "pulse-service")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    RUST_LOG            Log filter directives (default: info)
    RUST_LOG_FORMAT     "json" for JSON log lines, compact otherwise
    XDG_CONFIG_HOME     Base of the default config path (pulse/service.toml)
"#)]
struct Cli {
    /// Config file; created with defaults when missing
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_ref()).context("failed to load configuration")?;
    if cli.print_config {
        print!("{config}");
        return Ok(());
    }

    daemon::run(config).await
}
