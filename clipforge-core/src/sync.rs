use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::sqlite::configure_connection;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Commits job and media state transitions together. Both tables live in the
/// same database file precisely so these pairs can never drift apart.
#[derive(Debug, Clone)]
pub struct StateSynchronizer {
    path: PathBuf,
}

impl StateSynchronizer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn open(&self) -> SyncResult<Connection> {
        let conn = Connection::open(&self.path).map_err(|source| SyncError::Open {
            path: self.path.clone(),
            source,
        })?;
        configure_connection(&conn).map_err(|source| SyncError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    /// Derivation finished: the job closes and the item goes live in one
    /// transaction.
    pub fn complete_derivation(&self, job_id: i64, media_id: i64) -> SyncResult<()> {
        let conn = self.open()?;
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;
        conn.execute(
            "UPDATE jobs SET status = 'completed', finished_at = CURRENT_TIMESTAMP WHERE id = ?1",
            [job_id],
        )?;
        conn.execute(
            "UPDATE media_items
             SET status = 'completed', error = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            [media_id],
        )?;
        conn.execute("COMMIT", [])?;
        info!(job_id, media_id, "derivation committed");
        Ok(())
    }

    /// Acquisition finished: the fetch job (when one drove it) closes, the
    /// item returns to pending, and a derivation job is queued, all in one
    /// transaction. Returns the new job id.
    pub fn complete_acquisition(
        &self,
        job_id: Option<i64>,
        media_id: i64,
        priority: i64,
    ) -> SyncResult<i64> {
        let conn = self.open()?;
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;
        if let Some(job_id) = job_id {
            conn.execute(
                "UPDATE jobs SET status = 'completed', finished_at = CURRENT_TIMESTAMP WHERE id = ?1",
                [job_id],
            )?;
        }
        conn.execute(
            "UPDATE media_items
             SET status = 'pending', error = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            [media_id],
        )?;
        conn.execute(
            "INSERT INTO jobs (media_id, priority) VALUES (?1, ?2)",
            params![media_id, priority],
        )?;
        let new_job_id = conn.last_insert_rowid();
        conn.execute("COMMIT", [])?;
        info!(?job_id, media_id, new_job_id, "acquisition committed, derivation queued");
        Ok(new_job_id)
    }

    /// Marks the pair failed. The stored message carries a short correlation
    /// reference; the full diagnostics go to the log under the same
    /// reference so operators can match them up.
    pub fn fail(
        &self,
        job_id: Option<i64>,
        media_id: i64,
        user_message: &str,
        diagnostics: &str,
    ) -> SyncResult<String> {
        let reference = Uuid::new_v4().simple().to_string()[..8].to_string();
        error!(
            media_id,
            job_id,
            reference = %reference,
            diagnostics,
            "pipeline failure"
        );
        let conn = self.open()?;
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;
        if let Some(job_id) = job_id {
            conn.execute(
                "UPDATE jobs SET status = 'failed', finished_at = CURRENT_TIMESTAMP WHERE id = ?1",
                [job_id],
            )?;
        }
        conn.execute(
            "UPDATE media_items
             SET status = 'failed', error = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![media_id, format!("{user_message} (ref {reference})")],
        )?;
        conn.execute("COMMIT", [])?;
        Ok(reference)
    }
}
