//! Error types for the order book feed

use thiserror::Error;

/// Order book feed errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Stream connection error: {0}")]
    Connection(String),

    #[error("Stream transport error: {0}")]
    Transport(String),

    #[error("Failed to parse payload: {0}")]
    ParseError(String),

    #[error("Payload has no price field")]
    MissingPrice,

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Feed server error: {0}")]
    ServerError(String),

    #[error("Feed task failed: {0}")]
    Task(String),

    #[error("Max reconnection attempts exceeded after {attempts} attempts")]
    MaxReconnectAttemptsExceeded { attempts: u32 },
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Connection(err.to_string())
    }
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        FeedError::ServerError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
