//! Error types for the DonorLink real-time client.

use thiserror::Error;

/// Result type alias using DonorLink's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for real-time coordination.
///
/// None of these are fatal to the client: transport and REST failures are
/// logged by the caller and the UI keeps running in a degraded mode.
#[derive(Error, Debug)]
pub enum Error {
    /// Session missing or token empty; no connection attempt was made
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Connection attempt or handshake failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation requires a live connection
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Established transport failed mid-session
    #[error("Transport error: {0}")]
    Transport(String),

    /// Resource fetch for a cache key failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
