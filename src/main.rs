use anyhow::Result;
use clap::Parser;
use folio::{
    app::config::Config,
    cli::{self, Cli},
};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first to get verbose flag
    let cli = Cli::parse();

    // Config directory override decides where logs go
    if let Some(ref config_dir) = cli.config {
        folio::util::paths::set_config_dir_override(Some(config_dir.clone()));
    }

    let logs_dir = folio::util::paths::get_logs_dir().unwrap_or_else(|_| PathBuf::from("."));
    std::fs::create_dir_all(&logs_dir).ok();

    // Daily rotating JSON log file
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "folio.jsonl");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let log_level = if cli.verbose {
        tracing::Level::TRACE
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(tracing_subscriber::filter::LevelFilter::from_level(log_level)),
        )
        .init();

    tracing::info!("Starting folio {}", env!("CARGO_PKG_VERSION"));
    if let Some(ref config_dir) = cli.config {
        tracing::info!("Using config directory override: {:?}", config_dir);
    }
    tracing::trace!("CLI arguments: {:?}", cli);

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            tracing::error!("Failed to load configuration: {:#}", e);
            std::process::exit(cli::error::ERROR);
        }
    };
    tracing::debug!("Config loaded: {:?}", config);

    let exit_code = cli::handler::handle_command(cli.command, config).await;

    // Flush the log writer before exiting
    drop(_guard);
    std::process::exit(exit_code);
}
