use std::path::PathBuf;

use thiserror::Error;

use crate::invoker::InvokeError;
use crate::media::MediaError;

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("media item {slug} has no source file on record")]
    MissingSource { slug: String },
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid ffprobe payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("normalization failed for {slug}: {detail}")]
    Normalize { slug: String, detail: String },
}

pub type DeriveResult<T> = std::result::Result<T, DeriveError>;
