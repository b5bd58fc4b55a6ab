pub mod tracker;

pub use tracker::{PageProgress, ProgressTracker};
