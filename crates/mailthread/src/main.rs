use anyhow::Result;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod import;

use cli::{Cli, output_error};
use commands::run_cli;
use config::load_store_config;

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_store_config(cli.database.clone(), cli.attachments.clone());
    init_tracing(&config.log_filter);
    if let Some(err) = config.load_error.as_deref() {
        warn!(error = err, "ignoring unreadable mailthread.toml");
    }

    let rt = tokio::runtime::Runtime::new()?;
    if let Err(err) = rt.block_on(run_cli(cli.command, &config)) {
        return output_error(&format!("{:#}", err));
    }
    Ok(())
}
