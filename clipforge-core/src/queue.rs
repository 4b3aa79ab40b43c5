use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use thiserror::Error;

use crate::sqlite::configure_connection;

const JOBS_SCHEMA: &str = include_str!("../sql/jobs.sql");

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open job database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on job database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("job queue path not configured")]
    MissingStore,
    #[error("invalid job status: {0}")]
    InvalidStatus(String),
    #[error("job not found: {0}")]
    NotFound(i64),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Claimed,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Claimed => "claimed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "claimed" => Ok(Self::Claimed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(QueueError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobEntry {
    pub id: i64,
    pub media_id: i64,
    pub priority: i64,
    pub status: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: Option<NaiveDateTime> = row.get("created_at")?;
        let claimed_at: Option<NaiveDateTime> = row.get("claimed_at")?;
        let finished_at: Option<NaiveDateTime> = row.get("finished_at")?;
        Ok(Self {
            id: row.get("id")?,
            media_id: row.get("media_id")?,
            priority: row.get("priority")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(JobStatus::Queued),
            created_at: created_at.map(|dt| Utc.from_utc_datetime(&dt)),
            claimed_at: claimed_at.map(|dt| Utc.from_utc_datetime(&dt)),
            finished_at: finished_at.map(|dt| Utc.from_utc_datetime(&dt)),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub media_id: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SqliteJobQueueBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteJobQueueBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteJobQueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> QueueResult<SqliteJobQueue> {
        let path = self.path.ok_or(QueueError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(SqliteJobQueue { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteJobQueue {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteJobQueue {
    pub fn builder() -> SqliteJobQueueBuilder {
        SqliteJobQueueBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> QueueResult<Self> {
        SqliteJobQueueBuilder::new().path(path).build()
    }

    fn open(&self) -> QueueResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            QueueError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| QueueError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> QueueResult<()> {
        let conn = self.open()?;
        conn.execute_batch(JOBS_SCHEMA)?;
        Ok(())
    }

    pub fn enqueue(&self, media_id: i64, priority: i64) -> QueueResult<i64> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO jobs (media_id, priority) VALUES (?1, ?2)",
            params![media_id, priority],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Atomically picks the next queued job and marks it claimed. Ties on
    /// priority break FIFO; the trailing `id` key keeps ordering stable when
    /// several jobs land within the same second.
    pub fn claim_next(&self) -> QueueResult<Option<JobEntry>> {
        let conn = self.open()?;
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs
             WHERE status = 'queued'
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT 1",
        )?;
        let entry_opt = stmt.query_row([], |row| JobEntry::from_row(row)).optional()?;
        drop(stmt);
        if let Some(entry) = entry_opt {
            conn.execute(
                "UPDATE jobs SET status = 'claimed', claimed_at = CURRENT_TIMESTAMP WHERE id = ?1",
                [entry.id],
            )?;
            conn.execute("COMMIT", [])?;
            return self.fetch(entry.id);
        }
        conn.execute("ROLLBACK", [])?;
        Ok(None)
    }

    pub fn fetch(&self, id: i64) -> QueueResult<Option<JobEntry>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let entry = stmt.query_row([id], |row| JobEntry::from_row(row)).optional()?;
        Ok(entry)
    }

    pub fn mark_finished(&self, id: i64, status: JobStatus) -> QueueResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE jobs SET status = ?2, finished_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if affected == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    pub fn list(&self, filter: &JobFilter) -> QueueResult<Vec<JobEntry>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR media_id = ?2)
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT ?3",
        )?;
        let limit = filter.limit.unwrap_or(100) as i64;
        let rows = stmt
            .query_map(
                (
                    filter.status.as_ref().map(JobStatus::as_str),
                    filter.media_id,
                    limit,
                ),
                |row| JobEntry::from_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn counts(&self) -> QueueResult<HashMap<String, i64>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut map = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (status, count) = row?;
            map.insert(status, count);
        }
        Ok(map)
    }
}
