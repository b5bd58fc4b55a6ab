pub mod error;
pub mod metadata;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use metadata::CacheMetadata;
pub use store::CacheStore;
