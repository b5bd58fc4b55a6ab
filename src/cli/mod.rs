use clap::{Parser, Subcommand};

pub mod error;
pub mod handler;
pub mod output;

/// Folio - incremental gallery downloader
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Override config directory path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<std::path::PathBuf>,

    /// Enable verbose logging (TRACE level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download galleries, resuming from what is already cached
    Download {
        /// Gallery IDs
        #[arg(required = true)]
        ids: Vec<String>,

        /// Log progress instead of printing it
        #[arg(long, short)]
        quiet: bool,
    },

    /// Remove every cached file of a gallery
    Delete {
        /// Gallery ID
        id: String,
    },

    /// Show what is cached for a gallery
    Status {
        /// Gallery ID
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List cached galleries
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the gallery's first cached page (or a placeholder) to a file
    Thumbnail {
        /// Gallery ID
        id: String,

        /// Destination file
        #[arg(long, short)]
        output: std::path::PathBuf,
    },

    /// Remove page files not referenced by the gallery's record
    Prune {
        /// Gallery ID
        id: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the path of settings.toml
    Path,

    /// Write a settings.toml with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
