//! Error types for metakv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Consensus store ===
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    // === Leadership ===
    #[error("Not leader: current leader is {0}")]
    NotLeader(String),

    // === Encoding ===
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    // === Config ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this an error the caller should retry after?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::NotLeader(_))
    }

    /// Absent keys are a normal bootstrap case, not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Corruption(e.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}
