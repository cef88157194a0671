use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Document store unavailable: {0}")]
    LoadUnavailable(String),

    #[error("Document store rejected batch: {0}")]
    LoadRejected(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Type conversion error: {0}")]
    Type(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Type(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::MalformedInput(err.to_string())
    }
}
