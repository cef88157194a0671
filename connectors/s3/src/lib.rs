//! S3-compatible storage for batch artifacts, archives and lease markers.

mod config;
mod store;

pub use config::S3StoreConfig;
pub use store::S3ArtifactStore;
