pub mod archive;
pub mod config;
pub mod connector;
pub mod error;
pub mod extract;
pub mod job;
pub mod lease;
pub mod load;
pub mod locate;
pub mod memory;
pub mod metrics;
pub mod types;

pub use config::PipelineConfig;
pub use connector::{ArtifactStore, ConnectorConfig, DocumentSink, Transform};
pub use error::{Error, Result};
pub use job::{ArchiveStatus, PipelineJob, RunOutcome, RunReport, Stage};
pub use types::*;
