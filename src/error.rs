//! Error types for imageprogress

use thiserror::Error;

/// Result type alias using imageprogress Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that terminate an aggregation run
#[derive(Error, Debug)]
pub enum Error {
    /// The progress stream could not be decoded
    #[error("Decode error: {0}")]
    Protocol(#[from] imageprogress_protocol::ProtocolError),

    /// The runtime reported that the pull or push failed
    #[error("Remote error: {0}")]
    Remote(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The reader thread or blocking task died before finishing
    #[error("Reader error: {0}")]
    Reader(String),
}
