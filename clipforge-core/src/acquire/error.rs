use std::path::PathBuf;

use thiserror::Error;

use crate::invoker::InvokeError;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("url points at this instance and cannot be re-ingested")]
    SelfOrigin,
    #[error("media runs {actual}s, over the {limit}s limit")]
    TooLong { actual: u64, limit: u64 },
    #[error("{0}")]
    Exhausted(String),
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl AcquireError {
    /// Short text safe to show an end user. Diagnostics stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AcquireError::InvalidUrl(_) => "The link is not a valid video URL.".to_string(),
            AcquireError::SelfOrigin => {
                "This link points back at this site and cannot be re-downloaded.".to_string()
            }
            AcquireError::TooLong { actual, limit } => {
                format!("This video runs {actual} seconds, over the {limit} second limit.")
            }
            AcquireError::Exhausted(hint) => hint.clone(),
            _ => "Download failed. Check that the link is public and try again.".to_string(),
        }
    }
}

pub type AcquireResult<T> = std::result::Result<T, AcquireError>;
