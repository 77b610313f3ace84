use std::str::Utf8Error;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AvatarError>;

#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error(
        "Storage bucket \"{0}\" does not exist, run the bucket setup first"
    )]
    BucketNotFound(String),
    #[error("Storage error: {0}")]
    Store(String),
    #[error("Initialization failed: {0}")]
    Initialization(String),
    #[error("Avatar cache is not ready")]
    NotReady,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parsing error")]
    Parse,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AvatarError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<Utf8Error> for AvatarError {
    fn from(_: Utf8Error) -> Self {
        Self::Parse
    }
}

impl From<serde_json::Error> for AvatarError {
    fn from(_: serde_json::Error) -> Self {
        Self::Parse
    }
}

impl From<url::ParseError> for AvatarError {
    fn from(value: url::ParseError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<tokio::task::JoinError> for AvatarError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Other(anyhow::anyhow!(value.to_string()))
    }
}

/// Success flag plus optional error message, the shape callers at the
/// outer boundary (UI, CLI output) consume instead of a `Result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> From<Result<T>> for Outcome {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                error: None,
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}
