mod config;
mod sink;

pub use config::{MongoSinkConfig, MONGODB_URI_ENV};
pub use sink::MongoSink;
