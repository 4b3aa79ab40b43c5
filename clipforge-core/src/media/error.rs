use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("media item {slug} not found")]
    NotFound { slug: String },
    #[error("media item {slug} in unexpected status: {status}")]
    InvalidStatus { slug: String, status: String },
    #[error("media store path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;
