mod error;
mod models;
mod store;

pub use error::{MediaError, MediaResult};
pub use models::{generate_slug, MediaDraft, MediaItem, MediaStatus, SourceKind};
pub use store::{SqliteMediaStore, SqliteMediaStoreBuilder};
