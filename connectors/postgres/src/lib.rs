mod config;
mod sink;

pub use config::{PostgresSinkConfig, DATABASE_URL_ENV};
pub use sink::PostgresSink;
