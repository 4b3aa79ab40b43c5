use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clipforge_core::config::{AcquireSection, DeriveSection};
use clipforge_core::{
    AcquisitionChain, ArtifactLayout, CommandExecutor, DerivationChain, LibraryError, MediaDraft,
    MediaLibrary, MediaStatus, SourceKind, SqliteJobQueue, SqliteMediaStore, StateSynchronizer,
    ToolInvoker, Worker,
};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Notify;

const PROBE_JSON: &str = r#"{
    "streams": [{"codec_type": "video", "width": 640, "height": 360}],
    "format": {"duration": "4.0"}
}"#;

fn acquire_config() -> AcquireSection {
    AcquireSection {
        ytdlp_path: "yt-dlp".to_string(),
        own_domains: vec!["clipforge.local".to_string()],
        proxy_url: String::new(),
        rate_limit: String::new(),
        max_duration_seconds: 7200,
        timeout_seconds: 5,
        user_agent: "test-agent".to_string(),
    }
}

fn derive_config() -> DeriveSection {
    DeriveSection {
        ffmpeg_path: "ffmpeg".to_string(),
        ffprobe_path: "ffprobe".to_string(),
        probe_timeout_seconds: 5,
        transcode_timeout_seconds: 5,
        preset: "medium".to_string(),
        crf: 22,
        audio_bitrate: "128k".to_string(),
        hls_segment_seconds: 4,
        keyint: 48,
    }
}

struct FakeToolExecutor {
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeToolExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CommandExecutor for FakeToolExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<Output> {
        let std_command = command.as_std();
        let program = std_command.get_program().to_string_lossy().to_string();
        let args: Vec<String> = std_command
            .get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        self.calls.lock().unwrap().push(
            std::iter::once(program.clone())
                .chain(args.iter().cloned())
                .collect(),
        );
        if program.contains("ffprobe") {
            return Ok(Output {
                status: ExitStatus::from_raw(0),
                stdout: PROBE_JSON.as_bytes().to_vec(),
                stderr: Vec::new(),
            });
        }
        let dest = args.last().expect("invocation has a destination");
        if let Some(parent) = Path::new(dest).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, b"fake tool output")?;
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

/// Rejects only transcode invocations so the copy and playlist fallbacks
/// kick in while probe and thumbnail behave like healthy tools.
struct TranscodeFailExecutor;

impl TranscodeFailExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait::async_trait]
impl CommandExecutor for TranscodeFailExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<Output> {
        let std_command = command.as_std();
        let program = std_command.get_program().to_string_lossy().to_string();
        let args: Vec<String> = std_command
            .get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        if program.contains("ffprobe") {
            return Ok(Output {
                status: ExitStatus::from_raw(0),
                stdout: PROBE_JSON.as_bytes().to_vec(),
                stderr: Vec::new(),
            });
        }
        if args.iter().any(|arg| arg == "libx264") {
            return Ok(Output {
                status: ExitStatus::from_raw(256),
                stdout: Vec::new(),
                stderr: b"Unknown encoder 'libx264'".to_vec(),
            });
        }
        let dest = args.last().expect("invocation has a destination");
        if let Some(parent) = Path::new(dest).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, b"fake tool output")?;
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

struct Harness<E: CommandExecutor + 'static> {
    dir: TempDir,
    store: SqliteMediaStore,
    queue: SqliteJobQueue,
    layout: ArtifactLayout,
    library: MediaLibrary,
    worker: Worker,
    executor: Arc<E>,
}

fn harness(dir: TempDir, poll_interval: Duration) -> Harness<FakeToolExecutor> {
    harness_with(dir, poll_interval, FakeToolExecutor::new())
}

fn harness_with<E: CommandExecutor + 'static>(
    dir: TempDir,
    poll_interval: Duration,
    executor: Arc<E>,
) -> Harness<E> {
    let db_path = dir.path().join("library.sqlite");
    let store = SqliteMediaStore::builder().path(&db_path).build().unwrap();
    store.initialize().unwrap();
    let queue = SqliteJobQueue::builder().path(&db_path).build().unwrap();
    queue.initialize().unwrap();
    let layout = ArtifactLayout::new(dir.path().join("uploads"));
    layout.ensure_directories().unwrap();

    let acquire_config = acquire_config();
    let invoker = ToolInvoker::new(executor.clone(), acquire_config.timeout());
    let acquirer = Arc::new(AcquisitionChain::standard(acquire_config, invoker).unwrap());
    let deriver = DerivationChain::new(
        store.clone(),
        layout.clone(),
        derive_config(),
        executor.clone(),
    );
    let synchronizer = StateSynchronizer::new(&db_path);
    let wake = Arc::new(Notify::new());

    let worker = Worker::new(
        queue.clone(),
        store.clone(),
        synchronizer.clone(),
        Arc::clone(&acquirer),
        deriver,
        layout.clone(),
        poll_interval,
        Arc::clone(&wake),
    );
    let library = MediaLibrary::new(
        store.clone(),
        queue.clone(),
        synchronizer,
        acquirer,
        layout.clone(),
        wake,
    );

    Harness {
        dir,
        store,
        queue,
        layout,
        library,
        worker,
        executor,
    }
}

fn seed_pending_item<E: CommandExecutor>(harness: &Harness<E>) -> clipforge_core::MediaItem {
    let item = harness
        .store
        .create(
            SourceKind::Uploaded,
            MediaStatus::Pending,
            MediaDraft::default(),
        )
        .unwrap();
    let rel = format!("source/{}.mp4", item.slug);
    std::fs::write(harness.layout.resolve(&rel), b"seed source").unwrap();
    harness.store.set_source(item.id, &rel).unwrap();
    harness.store.fetch_by_id(item.id).unwrap().unwrap()
}

async fn wait_for_status(
    store: &SqliteMediaStore,
    id: i64,
    wanted: MediaStatus,
) -> clipforge_core::MediaItem {
    for _ in 0..100 {
        let item = store.fetch_by_id(id).unwrap().unwrap();
        if item.status == wanted {
            return item;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("item {id} never reached {wanted}");
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_drains_by_priority() {
    let harness = harness(TempDir::new().unwrap(), Duration::from_millis(50));
    let low = seed_pending_item(&harness);
    let high = seed_pending_item(&harness);
    harness.queue.enqueue(low.id, 1).unwrap();
    harness.queue.enqueue(high.id, 5).unwrap();

    let handle = harness.worker.start().expect("worker starts");
    wait_for_status(&harness.store, low.id, MediaStatus::Completed).await;
    wait_for_status(&harness.store, high.id, MediaStatus::Completed).await;
    harness.worker.stop();
    handle.join().await;

    // First tool invocation belongs to the priority-5 item.
    let calls = harness.executor.calls();
    let first_source_arg = calls
        .first()
        .and_then(|call| call.iter().find(|arg| arg.contains("source/")))
        .cloned()
        .expect("first call references a source file");
    assert!(first_source_arg.contains(&high.slug));
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_start_is_idempotent() {
    let harness = harness(TempDir::new().unwrap(), Duration::from_millis(50));
    let item = seed_pending_item(&harness);
    harness.queue.enqueue(item.id, 1).unwrap();

    let handle = harness.worker.start().expect("first start spawns");
    assert!(harness.worker.start().is_none());
    assert!(harness.worker.is_running());

    wait_for_status(&harness.store, item.id, MediaStatus::Completed).await;
    harness.worker.stop();
    handle.join().await;
    assert!(!harness.worker.is_running());

    // One loop processed the job exactly once.
    let counts = harness.queue.counts().unwrap();
    assert_eq!(counts.get("completed"), Some(&1));
    assert_eq!(counts.get("queued"), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_flows_to_completed_with_artifacts() {
    let harness = harness(TempDir::new().unwrap(), Duration::from_millis(50));
    let staged = harness.dir.path().join("staged_clip.mp4");
    std::fs::write(&staged, b"uploaded bytes").unwrap();

    let handle = harness.worker.start().expect("worker starts");
    let item = harness
        .library
        .create_upload(
            &staged,
            MediaDraft {
                title: Some("My clip".to_string()),
                owner: Some("sam".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(item.source_kind, SourceKind::Uploaded);
    assert!(!staged.exists(), "staged file moves into the source dir");

    let done = wait_for_status(&harness.store, item.id, MediaStatus::Completed).await;
    harness.worker.stop();
    handle.join().await;

    assert_eq!(done.title.as_deref(), Some("My clip"));
    assert_eq!(done.duration_s, Some(4.0));
    assert!(done.error.is_none());
    for rel in [
        done.source_path.unwrap(),
        done.normalized_path.unwrap(),
        done.thumbnail_path.unwrap(),
        done.hls_path.unwrap(),
    ] {
        let meta = std::fs::metadata(harness.layout.resolve(&rel)).unwrap();
        assert!(meta.len() > 0, "{rel} should exist and be non-empty");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_rejects_unsupported_extension() {
    let harness = harness(TempDir::new().unwrap(), Duration::from_millis(50));
    let staged = harness.dir.path().join("malware.exe");
    std::fs::write(&staged, b"not a video").unwrap();

    let err = harness
        .library
        .create_upload(&staged, MediaDraft::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LibraryError::UnsupportedExtension { .. }));
    assert!(harness.store.list(None, 10).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn self_origin_download_is_rejected_before_any_record() {
    let harness = harness(TempDir::new().unwrap(), Duration::from_millis(50));

    let err = harness
        .library
        .create_download("https://clipforge.local/watch/abc", MediaDraft::default())
        .unwrap_err();
    assert!(matches!(
        err,
        LibraryError::Acquire(clipforge_core::AcquireError::SelfOrigin)
    ));

    assert!(harness.store.list(None, 10).unwrap().is_empty());
    assert!(harness.queue.counts().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn transcode_failure_still_completes_with_copied_source() {
    let harness = harness_with(
        TempDir::new().unwrap(),
        Duration::from_millis(50),
        TranscodeFailExecutor::new(),
    );
    let item = seed_pending_item(&harness);
    harness.queue.enqueue(item.id, 1).unwrap();

    let handle = harness.worker.start().expect("worker starts");
    let done = wait_for_status(&harness.store, item.id, MediaStatus::Completed).await;
    harness.worker.stop();
    handle.join().await;

    assert_eq!(done.status, MediaStatus::Completed);
    assert!(done.error.is_none());

    let source = std::fs::read(harness.layout.resolve(&done.source_path.unwrap())).unwrap();
    let normalized = std::fs::read(harness.layout.resolve(&done.normalized_path.unwrap())).unwrap();
    assert_eq!(normalized, source, "copy fallback preserves the source bytes");

    // Thumbnail still comes from the working ffmpeg path, and the playlist
    // fallback points straight at the normalized file.
    let thumb = std::fs::metadata(harness.layout.resolve(&done.thumbnail_path.unwrap())).unwrap();
    assert!(thumb.len() > 0);
    let playlist =
        std::fs::read_to_string(harness.layout.resolve(&done.hls_path.unwrap())).unwrap();
    assert!(playlist.contains("normalized/"));
}
