use thiserror::Error;

use siren_common::error::AppError;

/// Failures of the shared task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task store is closed")]
    Closed,
}

/// Why a single delivery attempt did not succeed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Connection refused, DNS failure, timeout, ...
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Webhook responded with status {0}")]
    Status(u16),
}

/// Errors raised while building or starting the notifier.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Closed => {
                AppError::Unavailable("delivery subsystem is shutting down".to_string())
            }
            other => AppError::Store(other.to_string()),
        }
    }
}
