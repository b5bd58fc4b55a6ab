pub mod app;
pub mod cache;
pub mod cli;
pub mod download;
pub mod gallery;
pub mod progress;
pub mod util;

pub use app::config::Config;
pub use download::{DownloadOrchestrator, GalleryStatus};
pub use gallery::GalleryId;
