use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::request::State;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Work queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("Work queue is closed")]
    QueueClosed,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected status code: {0}")]
    Status(StatusCode),

    #[error("Body too large: {size} bytes (max: {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("Callback `{0}` failed")]
    Callback(&'static str),

    #[error("Cancelled by shutdown")]
    Cancelled,

    #[error("Illegal request transition from {from:?} to {to:?}")]
    IllegalTransition { from: State, to: State },
}

impl CrawlError {
    /// Whether a request hitting this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Status(_) | Self::BodyTooLarge { .. }
        )
    }
}

impl From<url::ParseError> for CrawlError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
