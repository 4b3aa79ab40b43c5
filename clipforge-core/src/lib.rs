pub mod acquire;
pub mod config;
pub mod derive;
pub mod error;
pub mod invoker;
pub mod library;
pub mod media;
pub mod queue;
pub mod sqlite;
pub mod sync;
pub mod worker;

pub use acquire::{
    AcquireError, AcquireResult, AcquireStrategy, AcquireTarget, Acquisition, AcquisitionChain,
    MediaMetadata, PageScrapeStrategy, RedditApiStrategy, StrategyRegistry, YtDlpStrategy,
};
pub use config::{load_config, ArtifactLayout, ClipforgeConfig};
pub use derive::{
    DerivationChain, DerivationReport, DeriveError, DeriveResult, ProbeSummary, StageMethod,
    StageName, StageOutcome,
};
pub use error::{ConfigError, Result};
pub use invoker::{
    CommandExecutor, InvokeError, InvokeResult, SystemCommandExecutor, ToolInvoker, ToolOutput,
};
pub use library::{allowed_extension, LibraryError, LibraryResult, MediaLibrary, ALLOWED_EXTENSIONS};
pub use media::{
    generate_slug, MediaDraft, MediaError, MediaItem, MediaResult, MediaStatus, SourceKind,
    SqliteMediaStore, SqliteMediaStoreBuilder,
};
pub use queue::{
    JobEntry, JobFilter, JobStatus, QueueError, QueueResult, SqliteJobQueue, SqliteJobQueueBuilder,
};
pub use sync::{StateSynchronizer, SyncError, SyncResult};
pub use worker::{Worker, WorkerError, WorkerHandle, WorkerResult, DERIVE_PRIORITY};
