use super::error;
use super::output::{self, ConsoleNotifier, GalleryReport};
use super::{Commands, ConfigAction};
use crate::app::config::Config;
use crate::cache::CacheStore;
use crate::download::{
    DownloadOrchestrator, GalleryStatus, HttpTransport, LogNotifier, NotificationBridge,
};
use crate::gallery::resolver::HttpResolver;
use crate::gallery::GalleryId;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Handle a CLI command and return exit code
pub async fn handle_command(command: Commands, config: Config) -> i32 {
    let result = match command {
        Commands::Download { ids, quiet } => handle_download(ids, quiet, &config).await,
        Commands::Delete { id } => handle_delete(id, &config).await,
        Commands::Status { id, json } => handle_status(id, json, &config).await,
        Commands::List { json } => handle_list(json, &config).await,
        Commands::Thumbnail { id, output } => handle_thumbnail(id, output, &config).await,
        Commands::Prune { id } => handle_prune(id, &config).await,
        Commands::Config { action } => handle_config(action, &config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            error::ERROR
        }
    }
}

/// Parse a gallery ID argument, printing the problem on failure
fn parse_id(raw: &str) -> Option<GalleryId> {
    match raw.parse() {
        Ok(id) => Some(id),
        Err(e) => {
            eprintln!("Error: {}", e);
            None
        }
    }
}

fn open_cache(config: &Config) -> Arc<CacheStore> {
    Arc::new(CacheStore::new(config.cache.directory.clone()))
}

fn start_orchestrator(config: &Config, bridge: Arc<dyn NotificationBridge>) -> Result<DownloadOrchestrator> {
    let resolver = HttpResolver::new(
        &config.network.metadata_base_url,
        &config.network.user_agent,
        Duration::from_secs(config.network.timeout_secs),
    )?;
    let transport = HttpTransport::new(&config.network)?;

    Ok(DownloadOrchestrator::start(
        &config.download,
        open_cache(config),
        Arc::new(resolver),
        Arc::new(transport),
        bridge,
    ))
}

/// Download galleries and wait until each one settles
async fn handle_download(raw_ids: Vec<String>, quiet: bool, config: &Config) -> Result<i32> {
    let mut ids = Vec::with_capacity(raw_ids.len());
    for raw in &raw_ids {
        match parse_id(raw) {
            Some(id) if !ids.contains(&id) => ids.push(id),
            Some(_) => {}
            None => return Ok(error::INVALID_INPUT),
        }
    }

    let bridge: Arc<dyn NotificationBridge> = if quiet {
        Arc::new(LogNotifier)
    } else {
        Arc::new(ConsoleNotifier::new())
    };
    let orchestrator = start_orchestrator(config, bridge)?;

    for &id in &ids {
        orchestrator.download(id).await;
    }

    let watching = &orchestrator;
    let waits = futures_util::future::join_all(
        ids.iter()
            .map(|&id| async move { (id, watching.wait(id).await) }),
    );

    let results = tokio::select! {
        results = waits => results,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("Error waiting for Ctrl+C: {}", e);
            }
            tracing::info!("Received Ctrl+C, cancelling downloads...");
            println!("\nInterrupted; cached pages are kept.");
            orchestrator.shutdown().await;
            return Ok(error::INTERRUPTED);
        }
    };

    orchestrator.shutdown().await;

    let mut code = error::SUCCESS;
    for (id, status) in results {
        match status {
            GalleryStatus::Completed => println!("✓ Gallery {} completed", id),
            GalleryStatus::NotFound => {
                println!("✗ Gallery {} not found", id);
                if code == error::SUCCESS {
                    code = error::NOT_FOUND;
                }
            }
            other => {
                println!("✗ Gallery {}: {}", id, other);
                code = error::ERROR;
            }
        }
    }

    Ok(code)
}

async fn handle_delete(raw_id: String, config: &Config) -> Result<i32> {
    let Some(id) = parse_id(&raw_id) else {
        return Ok(error::INVALID_INPUT);
    };

    let orchestrator = start_orchestrator(config, Arc::new(LogNotifier))?;
    let existed = orchestrator.cache().has_folder(id);
    orchestrator.delete(id).await?;
    orchestrator.shutdown().await;

    if existed {
        println!("Deleted gallery {}", id);
    } else {
        println!("Nothing cached for gallery {}", id);
    }
    Ok(error::SUCCESS)
}

async fn handle_status(raw_id: String, json: bool, config: &Config) -> Result<i32> {
    let Some(id) = parse_id(&raw_id) else {
        return Ok(error::INVALID_INPUT);
    };

    let orchestrator = start_orchestrator(config, Arc::new(LogNotifier))?;
    if !orchestrator.cache().has_folder(id) {
        orchestrator.shutdown().await;
        eprintln!("Gallery {} is not cached", id);
        return Ok(error::NOT_FOUND);
    }

    orchestrator.restore().await?;
    let metadata = orchestrator.cache().open(id).await?;
    let report = GalleryReport::new(id, &metadata, orchestrator.status(id))
        .with_pages(orchestrator.snapshot(id));
    orchestrator.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", output::format_gallery(&report, true));
    }
    Ok(error::SUCCESS)
}

async fn handle_list(json: bool, config: &Config) -> Result<i32> {
    let cache = open_cache(config);

    let mut reports = Vec::new();
    for id in cache.cached_galleries().await? {
        match cache.open(id).await {
            Ok(metadata) => {
                let status = if metadata.is_complete() {
                    GalleryStatus::Completed
                } else {
                    GalleryStatus::Idle
                };
                reports.push(GalleryReport::new(id, &metadata, status));
            }
            Err(e) => tracing::warn!("Skipping gallery {}: {}", id, e),
        }
    }

    println!("{}", output::format_galleries(&reports, json));
    Ok(error::SUCCESS)
}

async fn handle_thumbnail(raw_id: String, output: PathBuf, config: &Config) -> Result<i32> {
    let Some(id) = parse_id(&raw_id) else {
        return Ok(error::INVALID_INPUT);
    };

    let bytes = open_cache(config).thumbnail(id).await?;
    tokio::fs::write(&output, &bytes).await?;

    println!("Wrote {} bytes to {}", bytes.len(), output.display());
    Ok(error::SUCCESS)
}

async fn handle_prune(raw_id: String, config: &Config) -> Result<i32> {
    let Some(id) = parse_id(&raw_id) else {
        return Ok(error::INVALID_INPUT);
    };

    let removed = open_cache(config).prune_orphans(id).await?;
    println!("Removed {} orphaned file(s) from gallery {}", removed, id);
    Ok(error::SUCCESS)
}

fn handle_config(action: ConfigAction, config: &Config) -> Result<i32> {
    match action {
        ConfigAction::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("{}", toml::to_string_pretty(config)?);
            }
            Ok(error::SUCCESS)
        }
        ConfigAction::Path => {
            println!("{}", crate::util::paths::get_app_config_path()?.display());
            Ok(error::SUCCESS)
        }
        ConfigAction::Init { force } => {
            let path = crate::util::paths::get_app_config_path()?;
            if path.exists() && !force {
                eprintln!("{} already exists (use --force to overwrite)", path.display());
                return Ok(error::INVALID_INPUT);
            }

            let written = Config::default().save()?;
            println!("Wrote default configuration to {}", written.display());
            Ok(error::SUCCESS)
        }
    }
}
