use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClipforgeConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub worker: WorkerSection,
    pub acquire: AcquireSection,
    pub derive: DeriveSection,
}

impl ClipforgeConfig {
    /// Resolves a possibly-relative path against the configured base directory.
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.data_dir).join("library.sqlite")
    }

    pub fn upload_root(&self) -> PathBuf {
        self.resolve_path(&self.paths.upload_root)
    }

    /// Tool paths are explicit configuration; an empty value is a startup
    /// error, not something to repair at runtime.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("acquire.ytdlp_path", &self.acquire.ytdlp_path),
            ("derive.ffmpeg_path", &self.derive.ffmpeg_path),
            ("derive.ffprobe_path", &self.derive.ffprobe_path),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: "tool path must name a binary or an absolute path".to_string(),
                });
            }
        }
        if self.worker.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "worker.poll_interval_seconds".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub instance_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub upload_root: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    pub poll_interval_seconds: u64,
}

impl WorkerSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcquireSection {
    pub ytdlp_path: String,
    pub own_domains: Vec<String>,
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default)]
    pub rate_limit: String,
    pub max_duration_seconds: u64,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl AcquireSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn proxy(&self) -> Option<&str> {
        let trimmed = self.proxy_url.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn rate_limit(&self) -> Option<&str> {
        let trimmed = self.rate_limit.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeriveSection {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub probe_timeout_seconds: u64,
    pub transcode_timeout_seconds: u64,
    pub preset: String,
    pub crf: u8,
    pub audio_bitrate: String,
    pub hls_segment_seconds: u32,
    pub keyint: u32,
}

impl DeriveSection {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_seconds)
    }
}

pub const SOURCE_SUBDIR: &str = "source";
pub const NORMALIZED_SUBDIR: &str = "normalized";
pub const THUMBNAIL_SUBDIR: &str = "thumbnails";
pub const HLS_SUBDIR: &str = "hls";
pub const HLS_PLAYLIST_NAME: &str = "playlist.m3u8";

/// Slug-keyed layout of derived artifacts under the upload root. Paths stored
/// on media records are relative to the root so the serving layer can resolve
/// them without a database round trip.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join(SOURCE_SUBDIR)
    }

    pub fn normalized_rel(&self, slug: &str) -> String {
        format!("{NORMALIZED_SUBDIR}/{slug}.mp4")
    }

    pub fn thumbnail_rel(&self, slug: &str) -> String {
        format!("{THUMBNAIL_SUBDIR}/{slug}.jpg")
    }

    pub fn hls_playlist_rel(&self, slug: &str) -> String {
        format!("{HLS_SUBDIR}/{slug}/{HLS_PLAYLIST_NAME}")
    }

    pub fn hls_item_dir(&self, slug: &str) -> PathBuf {
        self.root.join(HLS_SUBDIR).join(slug)
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn relative_of(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .and_then(|rel| rel.to_str())
            .map(str::to_string)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for subdir in [SOURCE_SUBDIR, NORMALIZED_SUBDIR, THUMBNAIL_SUBDIR, HLS_SUBDIR] {
            std::fs::create_dir_all(self.root.join(subdir))?;
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClipforgeConfig> {
    let config: ClipforgeConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
