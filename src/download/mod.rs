pub mod error;
pub mod executor;
pub mod generation;
pub mod http_errors;
pub mod notify;
pub mod orchestrator;
pub mod transport;

pub use error::FetchError;
pub use executor::{DownloadEvent, ExecutorSettings};
pub use generation::{Generations, Ticket};
pub use notify::{LogNotifier, NotificationBridge};
pub use orchestrator::{DownloadOrchestrator, GalleryStatus};
pub use transport::{HttpTransport, PageRequest, ProgressFn, Transport, TransportError};
