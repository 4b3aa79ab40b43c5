use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;

use clipforge_core::{
    load_config, AcquisitionChain, ArtifactLayout, ClipforgeConfig, DerivationChain, JobFilter,
    MediaDraft, MediaItem, MediaLibrary, MediaStatus, SqliteJobQueue, SqliteMediaStore,
    StateSynchronizer, SystemCommandExecutor, ToolInvoker, Worker,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] clipforge_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Media(#[from] clipforge_core::MediaError),
    #[error(transparent)]
    Queue(#[from] clipforge_core::QueueError),
    #[error(transparent)]
    Library(#[from] clipforge_core::LibraryError),
    #[error(transparent)]
    Acquire(#[from] clipforge_core::AcquireError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "clipforge command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to the main clipforge.toml
    #[arg(long, default_value = "configs/clipforge.toml")]
    pub config: PathBuf,
    /// Override for paths.data_dir
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a summary of library and queue state
    Status,
    /// Create directories and database schemas
    Init,
    /// Media item operations
    #[command(subcommand)]
    Media(MediaCommands),
    /// Job queue operations
    #[command(subcommand)]
    Queue(QueueCommands),
    /// Run the background worker until interrupted
    Worker,
    /// Register a remote link and download it
    Download(DownloadArgs),
    /// Register an already-saved file for processing
    Upload(UploadArgs),
}

#[derive(Subcommand, Debug)]
pub enum MediaCommands {
    /// List media items
    List(MediaListArgs),
    /// Show one media item in full
    Show { slug: String },
    /// Delete a media item and its artifacts
    Delete { slug: String },
}

#[derive(Args, Debug)]
pub struct MediaListArgs {
    /// Filter by status
    #[arg(long)]
    pub status: Option<String>,
    /// Maximum rows returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List queued and recent jobs
    List(QueueListArgs),
    /// Queue a new job for an existing media item
    Add(QueueAddArgs),
}

#[derive(Args, Debug)]
pub struct QueueListArgs {
    /// Filter by status
    #[arg(long)]
    pub status: Option<String>,
    /// Maximum rows returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct QueueAddArgs {
    /// Media item slug
    pub slug: String,
    /// Claim priority, higher first
    #[arg(long, default_value_t = 1)]
    pub priority: i64,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Video page or file URL
    pub url: String,
    /// Title override
    #[arg(long)]
    pub title: Option<String>,
    /// Owner recorded on the item
    #[arg(long)]
    pub owner: Option<String>,
    /// Also run the worker and wait for derivation to finish
    #[arg(long, default_value_t = false)]
    pub wait: bool,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Path to the saved media file
    pub file: PathBuf,
    /// Title override
    #[arg(long)]
    pub title: Option<String>,
    /// Owner recorded on the item
    #[arg(long)]
    pub owner: Option<String>,
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing();
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Init => {
            let report = context.init()?;
            render(&report, cli.format)?;
        }
        Commands::Media(MediaCommands::List(args)) => {
            let list = context.media_list(args)?;
            render(&list, cli.format)?;
        }
        Commands::Media(MediaCommands::Show { slug }) => {
            let item = context.media_store()?.fetch_by_slug(slug)?.ok_or_else(|| {
                AppError::Media(clipforge_core::MediaError::NotFound { slug: slug.clone() })
            })?;
            render(&MediaDetail(item), cli.format)?;
        }
        Commands::Media(MediaCommands::Delete { slug }) => {
            let runtime = runtime()?;
            let (library, _worker) = context.pipeline()?;
            let item = runtime.block_on(library.delete_media(slug))?;
            render(&MediaDetail(item), cli.format)?;
        }
        Commands::Queue(QueueCommands::List(args)) => {
            let list = context.queue_list(args)?;
            render(&list, cli.format)?;
        }
        Commands::Queue(QueueCommands::Add(args)) => {
            let job = context.queue_add(args)?;
            render(&job, cli.format)?;
        }
        Commands::Worker => {
            let runtime = runtime()?;
            let (_library, worker) = context.pipeline()?;
            runtime.block_on(run_worker(worker))?;
        }
        Commands::Download(args) => {
            let runtime = runtime()?;
            let (library, worker) = context.pipeline()?;
            let item = runtime.block_on(run_download(library, worker, args))?;
            render(&MediaDetail(item), cli.format)?;
        }
        Commands::Upload(args) => {
            let runtime = runtime()?;
            let (library, _worker) = context.pipeline()?;
            let draft = MediaDraft {
                title: args.title.clone(),
                owner: args.owner.clone(),
                ..Default::default()
            };
            let item = runtime.block_on(library.create_upload(&args.file, draft))?;
            render(&MediaDetail(item), cli.format)?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

async fn run_worker(worker: Worker) -> Result<()> {
    let handle = worker.start();
    tokio::signal::ctrl_c().await?;
    worker.stop();
    if let Some(handle) = handle {
        handle.join().await;
    }
    Ok(())
}

async fn run_download(library: MediaLibrary, worker: Worker, args: &DownloadArgs) -> Result<MediaItem> {
    let draft = MediaDraft {
        title: args.title.clone(),
        owner: args.owner.clone(),
        ..Default::default()
    };
    let created = library.create_download(&args.url, draft)?;
    let slug = created.slug.clone();

    let handle = if args.wait { worker.start() } else { None };

    // Acquisition runs on a detached task; poll until the item leaves the
    // acquiring state (or, with --wait, reaches a terminal one).
    let item = loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let current = library.get_status(&slug)?;
        let settled = if args.wait {
            current.status.terminal()
        } else {
            current.status != MediaStatus::Acquiring
        };
        if settled {
            break current;
        }
    };

    if let Some(handle) = handle {
        worker.stop();
        handle.join().await;
    }
    Ok(item)
}

struct AppContext {
    config: ClipforgeConfig,
    db_path: PathBuf,
    layout: ArtifactLayout,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_config(&cli.config)?;
        if let Some(data_dir) = &cli.data_dir {
            config.paths.data_dir = data_dir.display().to_string();
        }
        let db_path = config.database_path();
        let layout = ArtifactLayout::new(config.upload_root());
        Ok(Self {
            config,
            db_path,
            layout,
        })
    }

    fn media_store(&self) -> Result<SqliteMediaStore> {
        Ok(SqliteMediaStore::builder().path(&self.db_path).build()?)
    }

    fn job_queue(&self) -> Result<SqliteJobQueue> {
        Ok(SqliteJobQueue::builder().path(&self.db_path).build()?)
    }

    fn init(&self) -> Result<InitReport> {
        std::fs::create_dir_all(self.config.resolve_path(&self.config.paths.data_dir))?;
        std::fs::create_dir_all(self.config.resolve_path(&self.config.paths.logs_dir))?;
        self.layout.ensure_directories()?;
        let media = self.media_store()?;
        media.initialize()?;
        let queue = self.job_queue()?;
        queue.initialize()?;
        Ok(InitReport {
            database: self.db_path.display().to_string(),
            upload_root: self.layout.root().display().to_string(),
        })
    }

    fn pipeline(&self) -> Result<(MediaLibrary, Worker)> {
        let media = self.media_store()?;
        media.initialize()?;
        let queue = self.job_queue()?;
        queue.initialize()?;
        self.layout.ensure_directories()?;

        let executor = Arc::new(SystemCommandExecutor);
        let acquire_invoker = ToolInvoker::new(executor.clone(), self.config.acquire.timeout());
        let acquirer = Arc::new(AcquisitionChain::standard(
            self.config.acquire.clone(),
            acquire_invoker,
        )?);
        let deriver = DerivationChain::new(
            media.clone(),
            self.layout.clone(),
            self.config.derive.clone(),
            executor,
        );
        let synchronizer = StateSynchronizer::new(&self.db_path);
        let wake = Arc::new(Notify::new());

        let worker = Worker::new(
            queue.clone(),
            media.clone(),
            synchronizer.clone(),
            Arc::clone(&acquirer),
            deriver,
            self.layout.clone(),
            self.config.worker.poll_interval(),
            Arc::clone(&wake),
        );
        let library = MediaLibrary::new(media, queue, synchronizer, acquirer, self.layout.clone(), wake);
        Ok((library, worker))
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let media_counts = self.media_store()?.count_by_status().unwrap_or_default();
        let job_counts = self.job_queue()?.counts().unwrap_or_default();
        Ok(StatusReport {
            instance_name: self.config.system.instance_name.clone(),
            environment: self.config.system.environment.clone(),
            media_counts,
            job_counts,
        })
    }

    fn media_list(&self, args: &MediaListArgs) -> Result<MediaList> {
        let status = parse_media_status(args.status.as_deref())?;
        let items = self.media_store()?.list(status, args.limit)?;
        Ok(MediaList {
            rows: items.into_iter().map(MediaRow::from).collect(),
        })
    }

    fn queue_list(&self, args: &QueueListArgs) -> Result<JobList> {
        let status = match args.status.as_deref() {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };
        let entries = self.job_queue()?.list(&JobFilter {
            status,
            media_id: None,
            limit: Some(args.limit),
        })?;
        Ok(JobList {
            rows: entries.into_iter().map(JobRow::from).collect(),
        })
    }

    fn queue_add(&self, args: &QueueAddArgs) -> Result<JobAdded> {
        let item = self.media_store()?.fetch_by_slug(&args.slug)?.ok_or_else(|| {
            AppError::Media(clipforge_core::MediaError::NotFound {
                slug: args.slug.clone(),
            })
        })?;
        let job_id = self.job_queue()?.enqueue(item.id, args.priority)?;
        Ok(JobAdded {
            job_id,
            slug: args.slug.clone(),
            priority: args.priority,
        })
    }
}

fn parse_media_status(raw: Option<&str>) -> Result<Option<MediaStatus>> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(AppError::InvalidArgument),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
struct StatusReport {
    instance_name: String,
    environment: String,
    media_counts: HashMap<String, usize>,
    job_counts: HashMap<String, i64>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut out = format!(
            "instance: {} ({})\nmedia:\n",
            self.instance_name, self.environment
        );
        let mut media: Vec<_> = self.media_counts.iter().collect();
        media.sort();
        for (status, count) in media {
            out.push_str(&format!("  {status:<10} {count}\n"));
        }
        out.push_str("jobs:\n");
        let mut jobs: Vec<_> = self.job_counts.iter().collect();
        jobs.sort();
        for (status, count) in jobs {
            out.push_str(&format!("  {status:<10} {count}\n"));
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Serialize)]
struct InitReport {
    database: String,
    upload_root: String,
}

impl DisplayFallback for InitReport {
    fn display(&self) -> String {
        format!(
            "initialized\n  database:    {}\n  upload root: {}",
            self.database, self.upload_root
        )
    }
}

#[derive(Debug, Serialize)]
struct MediaRow {
    slug: String,
    status: String,
    title: Option<String>,
    duration_s: Option<f64>,
    created_at: Option<String>,
}

impl From<MediaItem> for MediaRow {
    fn from(item: MediaItem) -> Self {
        Self {
            slug: item.slug,
            status: item.status.to_string(),
            title: item.title,
            duration_s: item.duration_s,
            created_at: item.created_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
struct MediaList {
    rows: Vec<MediaRow>,
}

impl DisplayFallback for MediaList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "no media items".to_string();
        }
        let mut out = format!("{:<10} {:<10} {:>8}  title\n", "slug", "status", "secs");
        for row in &self.rows {
            let duration = row
                .duration_s
                .map(|d| format!("{d:.1}"))
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "{:<10} {:<10} {:>8}  {}\n",
                row.slug,
                row.status,
                duration,
                row.title.as_deref().unwrap_or("-")
            ));
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Serialize)]
struct MediaDetail(MediaItem);

impl DisplayFallback for MediaDetail {
    fn display(&self) -> String {
        let item = &self.0;
        let mut out = String::new();
        out.push_str(&format!("slug:        {}\n", item.slug));
        out.push_str(&format!("status:      {}\n", item.status));
        out.push_str(&format!("kind:        {}\n", item.source_kind));
        out.push_str(&format!("title:       {}\n", item.title.as_deref().unwrap_or("-")));
        out.push_str(&format!("owner:       {}\n", item.owner.as_deref().unwrap_or("-")));
        if let Some(url) = &item.source_url {
            out.push_str(&format!("source url:  {url}\n"));
        }
        if let Some(path) = &item.source_path {
            out.push_str(&format!("source:      {path}\n"));
        }
        if let Some(path) = &item.normalized_path {
            out.push_str(&format!("normalized:  {path}\n"));
        }
        if let Some(path) = &item.hls_path {
            out.push_str(&format!("hls:         {path}\n"));
        }
        if let Some(path) = &item.thumbnail_path {
            out.push_str(&format!("thumbnail:   {path}\n"));
        }
        if let Some(duration) = item.duration_s {
            out.push_str(&format!("duration:    {duration:.1}s\n"));
        }
        if let (Some(width), Some(height)) = (item.width, item.height) {
            out.push_str(&format!("resolution:  {width}x{height}\n"));
        }
        if let Some(error) = &item.error {
            out.push_str(&format!("error:       {error}\n"));
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Serialize)]
struct JobRow {
    id: i64,
    media_id: i64,
    priority: i64,
    status: String,
    created_at: Option<String>,
}

impl From<clipforge_core::JobEntry> for JobRow {
    fn from(entry: clipforge_core::JobEntry) -> Self {
        Self {
            id: entry.id,
            media_id: entry.media_id,
            priority: entry.priority,
            status: entry.status.to_string(),
            created_at: entry.created_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
struct JobList {
    rows: Vec<JobRow>,
}

impl DisplayFallback for JobList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "no jobs".to_string();
        }
        let mut out = format!("{:>5} {:>8} {:>8}  {:<10} created\n", "id", "media", "prio", "status");
        for row in &self.rows {
            out.push_str(&format!(
                "{:>5} {:>8} {:>8}  {:<10} {}\n",
                row.id,
                row.media_id,
                row.priority,
                row.status,
                row.created_at.as_deref().unwrap_or("-")
            ));
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Serialize)]
struct JobAdded {
    job_id: i64,
    slug: String,
    priority: i64,
}

impl DisplayFallback for JobAdded {
    fn display(&self) -> String {
        format!(
            "queued job {} for {} at priority {}",
            self.job_id, self.slug, self.priority
        )
    }
}
