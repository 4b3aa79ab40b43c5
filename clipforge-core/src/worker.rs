use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::acquire::{AcquireTarget, AcquisitionChain};
use crate::config::ArtifactLayout;
use crate::derive::DerivationChain;
use crate::media::{MediaItem, MediaStatus, SqliteMediaStore};
use crate::queue::{JobEntry, JobStatus, SqliteJobQueue};
use crate::sync::StateSynchronizer;

pub const DERIVE_PRIORITY: i64 = 1;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
    #[error(transparent)]
    Media(#[from] crate::media::MediaError),
    #[error(transparent)]
    Sync(#[from] crate::sync::SyncError),
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Single background consumer of the job queue. Claims jobs one at a time,
/// dispatches on what the media item still needs, and records every outcome
/// through the synchronizer so job and item state stay paired.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    queue: SqliteJobQueue,
    media: SqliteMediaStore,
    synchronizer: StateSynchronizer,
    acquirer: Arc<AcquisitionChain>,
    deriver: DerivationChain,
    layout: ArtifactLayout,
    poll_interval: Duration,
    running: AtomicBool,
    stop: watch::Sender<bool>,
    wake: Arc<Notify>,
}

pub struct WorkerHandle {
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: SqliteJobQueue,
        media: SqliteMediaStore,
        synchronizer: StateSynchronizer,
        acquirer: Arc<AcquisitionChain>,
        deriver: DerivationChain,
        layout: ArtifactLayout,
        poll_interval: Duration,
        wake: Arc<Notify>,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(WorkerInner {
                queue,
                media,
                synchronizer,
                acquirer,
                deriver,
                layout,
                poll_interval,
                running: AtomicBool::new(false),
                stop,
                wake,
            }),
        }
    }

    /// Wakes the loop out of its idle sleep so fresh jobs start immediately.
    pub fn nudge(&self) {
        self.inner.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawns the loop. Returns `None` when one is already running.
    pub fn start(&self) -> Option<WorkerHandle> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.inner.stop.send_replace(false);
        let inner = Arc::clone(&self.inner);
        let join = tokio::spawn(async move {
            inner.run_loop().await;
            inner.running.store(false, Ordering::SeqCst);
        });
        Some(WorkerHandle { join })
    }

    pub fn stop(&self) {
        self.inner.stop.send_replace(true);
        self.inner.wake.notify_one();
    }
}

impl WorkerInner {
    async fn run_loop(&self) {
        info!(poll_interval = ?self.poll_interval, "worker loop started");
        let mut stop_rx = self.stop.subscribe();
        loop {
            if *stop_rx.borrow() {
                break;
            }
            match self.queue.claim_next() {
                Ok(Some(entry)) => {
                    if let Err(err) = self.process_entry(&entry).await {
                        warn!(job_id = entry.id, error = %err, "job bookkeeping failed");
                    }
                    // Drain the backlog before sleeping again.
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "claim failed, retrying next cycle");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {}
                _ = stop_rx.changed() => {}
            }
        }
        info!("worker loop stopped");
    }

    async fn process_entry(&self, entry: &JobEntry) -> WorkerResult<()> {
        let Some(item) = self.media.fetch_by_id(entry.media_id)? else {
            warn!(job_id = entry.id, media_id = entry.media_id, "job references missing media item");
            self.queue.mark_finished(entry.id, JobStatus::Failed)?;
            return Ok(());
        };

        if needs_acquisition(&item) {
            self.run_acquisition(entry, &item).await
        } else {
            self.run_derivation(entry, &item).await
        }
    }

    async fn run_acquisition(&self, entry: &JobEntry, item: &MediaItem) -> WorkerResult<()> {
        let Some(url) = item.source_url.clone() else {
            self.synchronizer.fail(
                Some(entry.id),
                item.id,
                "No source link was recorded for this item.",
                "acquisition job without source_url",
            )?;
            return Ok(());
        };

        info!(slug = %item.slug, url = %url, "acquisition started");
        self.media.update_status(item.id, MediaStatus::Acquiring)?;
        let target = AcquireTarget::new(self.layout.source_dir(), &item.slug);

        match self.acquirer.run(&url, &target).await {
            Ok(acquisition) => {
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
                    .complete_acquisition(Some(entry.id), item.id, DERIVE_PRIORITY)?;
                self.wake.notify_one();
            }
            Err(err) => {
                self.synchronizer.fail(
                    Some(entry.id),
                    item.id,
                    &err.user_message(),
                    &format!("acquisition of {url} failed: {err}"),
                )?;
            }
        }
        Ok(())
    }

    async fn run_derivation(&self, entry: &JobEntry, item: &MediaItem) -> WorkerResult<()> {
        info!(slug = %item.slug, "derivation started");
        self.media.update_status(item.id, MediaStatus::Deriving)?;
        match self.deriver.run(item).await {
            Ok(report) => {
                if !report.fully_primary() {
                    warn!(slug = %item.slug, "derivation used fallback stages");
                }
                self.synchronizer.complete_derivation(entry.id, item.id)?;
            }
            Err(err) => {
                self.synchronizer.fail(
                    Some(entry.id),
                    item.id,
                    "Processing failed. The file may be corrupt or in an unsupported format.",
                    &format!("derivation of {} failed: {err}", item.slug),
                )?;
            }
        }
        Ok(())
    }
}

/// A claimed job means acquisition when the item still lacks a local source
/// file but carries a link; anything else proceeds straight to derivation.
fn needs_acquisition(item: &MediaItem) -> bool {
    item.source_path.is_none() && item.source_url.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::AcquireError;
    use crate::media::SourceKind;
    use chrono::Utc;

    fn item(source_url: Option<&str>, source_path: Option<&str>) -> MediaItem {
        MediaItem {
            id: 1,
            slug: "ab12cd34".to_string(),
            title: None,
            description: None,
            owner: None,
            source_kind: SourceKind::RemoteLink,
            source_url: source_url.map(str::to_string),
            source_path: source_path.map(str::to_string),
            normalized_path: None,
            hls_path: None,
            thumbnail_path: None,
            duration_s: None,
            width: None,
            height: None,
            size_bytes: None,
            status: MediaStatus::Pending,
            error: None,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        }
    }

    #[test]
    fn dispatch_prefers_acquisition_only_without_source_file() {
        assert!(needs_acquisition(&item(Some("https://example.com/v"), None)));
        assert!(!needs_acquisition(&item(
            Some("https://example.com/v"),
            Some("source/ab12cd34.mp4")
        )));
        assert!(!needs_acquisition(&item(None, Some("source/ab12cd34.mp4"))));
        assert!(!needs_acquisition(&item(None, None)));
    }

    #[test]
    fn user_messages_stay_actionable() {
        let message = AcquireError::TooLong {
            actual: 9000,
            limit: 7200,
        }
        .user_message();
        assert!(message.contains("9000"));
        assert!(message.contains("7200"));
        assert_eq!(
            AcquireError::Exhausted("custom hint".to_string()).user_message(),
            "custom hint"
        );
    }
}
