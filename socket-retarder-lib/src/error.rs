#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors that can occur in the retarder
#[derive(Error, Debug)]
pub enum RetarderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed control frame: {0}")]
    Frame(String),

    #[error("No free proxy port in {0}..={1}")]
    NoProxyPort(u16, u16),

    #[error("Proxy worker error: {0}")]
    Proxy(String),
}

pub type Result<T> = std::result::Result<T, RetarderError>;
