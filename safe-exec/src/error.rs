use thiserror::Error;

use crate::validator::Rejection;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(#[from] Rejection),

    #[error("Too many concurrent executions (limit {0})")]
    Busy(usize),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System error: {0}")]
    System(String),
}

impl Error {
    /// Whether the caller is to blame for this error.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
