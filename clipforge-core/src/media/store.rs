use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::sqlite::configure_connection;

use super::models::{generate_slug, MediaDraft, MediaItem, MediaStatus, SourceKind};
use super::{MediaError, MediaResult};

const MEDIA_SCHEMA: &str = include_str!("../../sql/media.sql");

#[derive(Debug, Clone)]
pub struct SqliteMediaStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteMediaStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteMediaStoreBuilder {
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

    pub fn build(self) -> MediaResult<SqliteMediaStore> {
        let path = self.path.ok_or(MediaError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(SqliteMediaStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteMediaStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteMediaStore {
    pub fn builder() -> SqliteMediaStoreBuilder {
        SqliteMediaStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> MediaResult<Self> {
        SqliteMediaStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> MediaResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            MediaError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| MediaError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> MediaResult<()> {
        let conn = self.open()?;
        conn.execute_batch(MEDIA_SCHEMA)?;
        Ok(())
    }

    pub fn create(&self, kind: SourceKind, status: MediaStatus, draft: MediaDraft) -> MediaResult<MediaItem> {
        let conn = self.open()?;
        let slug = generate_slug();
        conn.execute(
            "INSERT INTO media_items (
                slug, title, description, owner, source_kind, source_url, source_path, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &slug,
                &draft.title,
                &draft.description,
                &draft.owner,
                kind.as_str(),
                &draft.source_url,
                &draft.source_path,
                status.as_str(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.fetch_by_id(id)?.ok_or(MediaError::NotFound { slug })
    }

    pub fn fetch_by_id(&self, id: i64) -> MediaResult<Option<MediaItem>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM media_items WHERE id = ?1")?;
        let item = stmt
            .query_row([id], |row| MediaItem::from_row(row))
            .optional()?;
        Ok(item)
    }

    pub fn fetch_by_slug(&self, slug: &str) -> MediaResult<Option<MediaItem>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM media_items WHERE slug = ?1")?;
        let item = stmt
            .query_row([slug], |row| MediaItem::from_row(row))
            .optional()?;
        Ok(item)
    }

    pub fn list(&self, status: Option<MediaStatus>, limit: usize) -> MediaResult<Vec<MediaItem>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM media_items
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                (status.as_ref().map(MediaStatus::as_str), limit as i64),
                |row| MediaItem::from_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_by_status(&self) -> MediaResult<HashMap<String, usize>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM media_items GROUP BY status")?;
        let mut map = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (status, count) = row?;
            map.insert(status, count as usize);
        }
        Ok(map)
    }

    pub fn update_status(&self, id: i64, status: MediaStatus) -> MediaResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE media_items SET status = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if affected == 0 {
            return Err(MediaError::NotFound {
                slug: format!("id:{id}"),
            });
        }
        Ok(())
    }

    /// Records where the source file landed after an acquisition.
    pub fn set_source(&self, id: i64, source_path: &str) -> MediaResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE media_items
             SET source_path = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![id, source_path],
        )?;
        Ok(())
    }

    /// Fills title and description from upstream metadata without clobbering
    /// values the owner already set.
    pub fn set_title_description(
        &self,
        id: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> MediaResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE media_items
             SET title = CASE WHEN title IS NULL OR title = '' THEN COALESCE(?2, title) ELSE title END,
                 description = CASE WHEN description IS NULL OR description = '' THEN COALESCE(?3, description) ELSE description END,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![id, title, description],
        )?;
        Ok(())
    }

    pub fn set_default_title(&self, id: i64, title: &str) -> MediaResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE media_items
             SET title = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND (title IS NULL OR title = '')",
            params![id, title],
        )?;
        Ok(())
    }

    pub fn set_metadata(
        &self,
        id: i64,
        duration_s: Option<f64>,
        width: Option<i64>,
        height: Option<i64>,
        size_bytes: Option<i64>,
    ) -> MediaResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE media_items
             SET duration_s = COALESCE(?2, duration_s),
                 width = COALESCE(?3, width),
                 height = COALESCE(?4, height),
                 size_bytes = COALESCE(?5, size_bytes),
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![id, duration_s, width, height, size_bytes],
        )?;
        Ok(())
    }

    pub fn set_thumbnail_path(&self, id: i64, path: &str) -> MediaResult<()> {
        self.set_artifact(id, "thumbnail_path", path)
    }

    pub fn set_normalized_path(&self, id: i64, path: &str) -> MediaResult<()> {
        self.set_artifact(id, "normalized_path", path)
    }

    pub fn set_hls_path(&self, id: i64, path: &str) -> MediaResult<()> {
        self.set_artifact(id, "hls_path", path)
    }

    fn set_artifact(&self, id: i64, column: &str, path: &str) -> MediaResult<()> {
        let conn = self.open()?;
        conn.execute(
            &format!(
                "UPDATE media_items SET {column} = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1"
            ),
            params![id, path],
        )?;
        Ok(())
    }

    /// Removes the item and its jobs in one transaction, returning the record
    /// so the caller can delete artifacts from disk.
    pub fn delete_cascade(&self, slug: &str) -> MediaResult<Option<MediaItem>> {
        let conn = self.open()?;
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;
        let mut stmt = conn.prepare("SELECT * FROM media_items WHERE slug = ?1")?;
        let item_opt = stmt
            .query_row([slug], |row| MediaItem::from_row(row))
            .optional()?;
        drop(stmt);
        if let Some(item) = item_opt {
            conn.execute("DELETE FROM jobs WHERE media_id = ?1", [item.id])?;
            conn.execute("DELETE FROM media_items WHERE id = ?1", [item.id])?;
            conn.execute("COMMIT", [])?;
            return Ok(Some(item));
        }
        conn.execute("ROLLBACK", [])?;
        Ok(None)
    }
}
