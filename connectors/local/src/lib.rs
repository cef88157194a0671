mod config;
mod store;

pub use config::LocalStoreConfig;
pub use store::LocalArtifactStore;
