use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::acquire::{AcquireError, AcquireTarget, AcquisitionChain};
use crate::config::ArtifactLayout;
use crate::media::{MediaDraft, MediaItem, MediaStatus, SourceKind, SqliteMediaStore};
use crate::queue::SqliteJobQueue;
use crate::sync::StateSynchronizer;
use crate::worker::DERIVE_PRIORITY;

pub const ALLOWED_EXTENSIONS: [&str; 7] = ["mp4", "mov", "avi", "mkv", "webm", "flv", "wmv"];

/// Lowercased extension of `file_name` when it is one this pipeline accepts.
pub fn allowed_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("unsupported file type: {file_name}")]
    UnsupportedExtension { file_name: String },
    #[error(transparent)]
    Media(#[from] crate::media::MediaError),
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
    #[error(transparent)]
    Sync(#[from] crate::sync::SyncError),
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

pub type LibraryResult<T> = std::result::Result<T, LibraryError>;

/// Entry point for everything a front end does with media: register uploads,
/// start remote downloads, read status, delete. Owns no background loop; the
/// worker consumes what this facade enqueues.
#[derive(Clone)]
pub struct MediaLibrary {
    media: SqliteMediaStore,
    queue: SqliteJobQueue,
    synchronizer: StateSynchronizer,
    acquirer: Arc<AcquisitionChain>,
    layout: ArtifactLayout,
    wake: Arc<Notify>,
}

impl MediaLibrary {
    pub fn new(
        media: SqliteMediaStore,
        queue: SqliteJobQueue,
        synchronizer: StateSynchronizer,
        acquirer: Arc<AcquisitionChain>,
        layout: ArtifactLayout,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            media,
            queue,
            synchronizer,
            acquirer,
            layout,
            wake,
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Registers an already-saved file and queues its derivation. The staged
    /// file is moved under the source directory, keyed by the new slug.
    pub async fn create_upload(
        &self,
        staged: &Path,
        draft: MediaDraft,
    ) -> LibraryResult<MediaItem> {
        let file_name = staged
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let ext = allowed_extension(file_name).ok_or_else(|| {
            LibraryError::UnsupportedExtension {
                file_name: file_name.to_string(),
            }
        })?;

        let item = self
            .media
            .create(SourceKind::Uploaded, MediaStatus::Pending, draft)?;
        let dest = self.layout.source_dir().join(format!("{}.{ext}", item.slug));
        move_file(staged, &dest).await?;
        let rel = self
            .layout
            .relative_of(&dest)
            .unwrap_or_else(|| format!("source/{}.{ext}", item.slug));
        self.media.set_source(item.id, &rel)?;
        self.queue.enqueue(item.id, DERIVE_PRIORITY)?;
        self.wake.notify_one();
        info!(slug = %item.slug, "upload registered");

        Ok(self.media.fetch_by_id(item.id)?.unwrap_or(item))
    }

    /// Validates the link synchronously, registers the item, and hands the
    /// actual download to a detached task so the caller returns immediately.
    pub fn create_download(&self, url: &str, mut draft: MediaDraft) -> LibraryResult<MediaItem> {
        self.acquirer.check_url(url)?;
        draft.source_url = Some(url.to_string());
        let item = self
            .media
            .create(SourceKind::RemoteLink, MediaStatus::Acquiring, draft)?;
        info!(slug = %item.slug, url, "download registered");

        let library = self.clone();
        let task_item = item.clone();
        let task_url = url.to_string();
        tokio::spawn(async move {
            library.run_acquisition(task_item, task_url).await;
        });

        Ok(item)
    }

    async fn run_acquisition(&self, item: MediaItem, url: String) {
        let target = AcquireTarget::new(self.layout.source_dir(), &item.slug);
        match self.acquirer.run(&url, &target).await {
            Ok(acquisition) => {
                let committed = self.commit_acquisition(&item, &acquisition);
                if let Err(err) = committed {
                    warn!(slug = %item.slug, error = %err, "acquired but failed to commit");
                    let _ = self.synchronizer.fail(
                        None,
                        item.id,
                        "Download succeeded but could not be recorded.",
                        &format!("post-acquisition commit failed: {err}"),
                    );
                }
            }
            Err(err) => {
                let message = err.user_message();
                let _ = self.synchronizer.fail(
                    None,
                    item.id,
                    &message,
                    &format!("acquisition of {url} failed: {err}"),
                );
            }
        }
    }

    fn commit_acquisition(
        &self,
        item: &MediaItem,
        acquisition: &crate::acquire::Acquisition,
    ) -> LibraryResult<()> {
        let rel = self
            .layout
            .relative_of(&acquisition.source_path)
            .unwrap_or_else(|| acquisition.source_path.display().to_string());
        self.media.set_source(item.id, &rel)?;
        self.media.set_title_description(
            item.id,
            acquisition.metadata.title.as_deref(),
            acquisition.metadata.description.as_deref(),
        )?;
        self.media.set_metadata(
            item.id,
            acquisition.metadata.duration_seconds,
            acquisition.metadata.width,
            acquisition.metadata.height,
            None,
        )?;
        self.synchronizer
            .complete_acquisition(None, item.id, DERIVE_PRIORITY)?;
        self.wake.notify_one();
        Ok(())
    }

    pub fn get_status(&self, slug: &str) -> LibraryResult<MediaItem> {
        self.media
            .fetch_by_slug(slug)?
            .ok_or_else(|| {
                LibraryError::Media(crate::media::MediaError::NotFound {
                    slug: slug.to_string(),
                })
            })
    }

    pub fn list(
        &self,
        status: Option<MediaStatus>,
        limit: usize,
    ) -> LibraryResult<Vec<MediaItem>> {
        Ok(self.media.list(status, limit)?)
    }

    /// Removes artifacts from disk, then the record and its jobs. Missing
    /// files are skipped, not errors; a half-derived item must still delete.
    pub async fn delete_media(&self, slug: &str) -> LibraryResult<MediaItem> {
        let Some(item) = self.media.fetch_by_slug(slug)? else {
            return Err(LibraryError::Media(crate::media::MediaError::NotFound {
                slug: slug.to_string(),
            }));
        };

        for rel in [&item.source_path, &item.normalized_path, &item.thumbnail_path] {
            if let Some(rel) = rel {
                let path = self.layout.resolve(rel);
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path.display(), error = %err, "artifact already gone");
                }
            }
        }
        let hls_dir = self.layout.hls_item_dir(&item.slug);
        if let Err(err) = tokio::fs::remove_dir_all(&hls_dir).await {
            debug!(path = %hls_dir.display(), error = %err, "hls directory already gone");
        }

        let removed = self.media.delete_cascade(slug)?;
        info!(slug, "media item deleted");
        removed.ok_or_else(|| {
            LibraryError::Media(crate::media::MediaError::NotFound {
                slug: slug.to_string(),
            })
        })
    }
}

/// Rename when possible, copy-and-remove when the staging area sits on a
/// different filesystem.
async fn move_file(from: &Path, to: &Path) -> LibraryResult<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| LibraryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|source| LibraryError::Io {
            path: to.to_path_buf(),
            source,
        })?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|source| LibraryError::Io {
            path: from.to_path_buf(),
            source,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_allow_list() {
        assert_eq!(allowed_extension("clip.mp4"), Some("mp4".to_string()));
        assert_eq!(allowed_extension("CLIP.MKV"), Some("mkv".to_string()));
        assert_eq!(allowed_extension("archive.tar.webm"), Some("webm".to_string()));
        assert_eq!(allowed_extension("script.exe"), None);
        assert_eq!(allowed_extension("noextension"), None);
    }
}
