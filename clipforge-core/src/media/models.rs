use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a media item. Uploads enter at `Pending`; remote links pass
/// through `Acquiring` first and reach `Pending` once the source file is on
/// disk. `Failed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    Pending,
    Acquiring,
    Deriving,
    Completed,
    Failed,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Pending => "pending",
            MediaStatus::Acquiring => "acquiring",
            MediaStatus::Deriving => "deriving",
            MediaStatus::Completed => "completed",
            MediaStatus::Failed => "failed",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, MediaStatus::Completed | MediaStatus::Failed)
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MediaStatus::Pending),
            "acquiring" => Ok(MediaStatus::Acquiring),
            "deriving" => Ok(MediaStatus::Deriving),
            "completed" => Ok(MediaStatus::Completed),
            "failed" => Ok(MediaStatus::Failed),
            other => Err(format!("unknown media status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Uploaded,
    RemoteLink,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Uploaded => "uploaded",
            SourceKind::RemoteLink => "remote_link",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(SourceKind::Uploaded),
            "remote_link" => Ok(SourceKind::RemoteLink),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}

/// Short URL-safe identifier used in artifact paths and public addresses.
pub fn generate_slug() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaItem {
    pub id: i64,
    pub slug: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub source_kind: SourceKind,
    pub source_url: Option<String>,
    pub source_path: Option<String>,
    pub normalized_path: Option<String>,
    pub hls_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub duration_s: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub size_bytes: Option<i64>,
    pub status: MediaStatus,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: Option<NaiveDateTime> = row.get("created_at")?;
        let updated_at: Option<NaiveDateTime> = row.get("updated_at")?;
        Ok(Self {
            id: row.get("id")?,
            slug: row.get("slug")?,
            title: row.get("title")?,
            description: row.get("description")?,
            owner: row.get("owner")?,
            source_kind: row
                .get::<_, String>("source_kind")?
                .parse()
                .unwrap_or(SourceKind::Uploaded),
            source_url: row.get("source_url")?,
            source_path: row.get("source_path")?,
            normalized_path: row.get("normalized_path")?,
            hls_path: row.get("hls_path")?,
            thumbnail_path: row.get("thumbnail_path")?,
            duration_s: row.get("duration_s")?,
            width: row.get("width")?,
            height: row.get("height")?,
            size_bytes: row.get("size_bytes")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(MediaStatus::Pending),
            error: row.get("error")?,
            created_at: created_at.map(|dt| Utc.from_utc_datetime(&dt)),
            updated_at: updated_at.map(|dt| Utc.from_utc_datetime(&dt)),
        })
    }
}

/// Fields supplied when a media item is first registered, before any
/// acquisition or derivation has run.
#[derive(Debug, Clone, Default)]
pub struct MediaDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub source_url: Option<String>,
    pub source_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_short_hex() {
        let slug = generate_slug();
        assert_eq!(slug.len(), 8);
        assert!(slug.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn status_round_trips() {
        for status in [
            MediaStatus::Pending,
            MediaStatus::Acquiring,
            MediaStatus::Deriving,
            MediaStatus::Completed,
            MediaStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MediaStatus>(), Ok(status));
        }
        assert!("unknown".parse::<MediaStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(MediaStatus::Completed.terminal());
        assert!(MediaStatus::Failed.terminal());
        assert!(!MediaStatus::Deriving.terminal());
    }
}
