mod error;
mod reddit;
mod registry;
mod scrape;
mod ytdlp;

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use url::Url;

use crate::config::AcquireSection;
use crate::invoker::ToolInvoker;

pub use error::{AcquireError, AcquireResult};
pub use reddit::RedditApiStrategy;
pub use registry::StrategyRegistry;
pub use scrape::PageScrapeStrategy;
pub use ytdlp::YtDlpStrategy;

/// Upstream metadata gathered before or during a fetch. Everything is
/// optional; a strategy reports what the platform exposes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration_seconds: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Destination for a fetched source file. The final extension depends on
/// what the upstream serves, so strategies write `slug.<ext>` under `dir`
/// and the chain locates whichever landed.
#[derive(Debug, Clone)]
pub struct AcquireTarget {
    pub dir: PathBuf,
    pub slug: String,
}

impl AcquireTarget {
    pub fn new(dir: impl Into<PathBuf>, slug: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            slug: slug.into(),
        }
    }

    /// yt-dlp style output template, extension filled in by the tool.
    pub fn template(&self) -> PathBuf {
        self.dir.join(format!("{}.%(ext)s", self.slug))
    }

    pub fn with_extension(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{ext}", self.slug))
    }

    pub fn find_result(&self) -> Option<PathBuf> {
        let prefix = format!("{}.", self.slug);
        let entries = std::fs::read_dir(&self.dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && !name.ends_with(".part") {
                return Some(entry.path());
            }
        }
        None
    }
}

#[async_trait::async_trait]
pub trait AcquireStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspects the URL without downloading. `Ok(None)` means the strategy
    /// cannot see metadata here; that alone does not disqualify its fetch.
    async fn probe(&self, url: &Url) -> AcquireResult<Option<MediaMetadata>>;

    async fn fetch(&self, url: &Url, target: &AcquireTarget) -> AcquireResult<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct Acquisition {
    pub source_path: PathBuf,
    pub metadata: MediaMetadata,
}

/// Runs strategies for a URL in registry order until one produces a usable
/// source file.
pub struct AcquisitionChain {
    registry: StrategyRegistry,
    config: AcquireSection,
}

impl AcquisitionChain {
    pub fn new(registry: StrategyRegistry, config: AcquireSection) -> Self {
        Self { registry, config }
    }

    /// Builds the default strategy line-up backed by real tool and network
    /// access.
    pub fn standard(config: AcquireSection, invoker: ToolInvoker) -> AcquireResult<Self> {
        let client = build_http_client(&config)?;
        let registry = StrategyRegistry::standard(&config, invoker, client);
        Ok(Self::new(registry, config))
    }

    pub fn check_url(&self, raw_url: &str) -> AcquireResult<Url> {
        let url = Url::parse(raw_url).map_err(|_| AcquireError::InvalidUrl(raw_url.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AcquireError::InvalidUrl(raw_url.to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| AcquireError::InvalidUrl(raw_url.to_string()))?;
        if self.is_own_domain(host) {
            return Err(AcquireError::SelfOrigin);
        }
        Ok(url)
    }

    fn is_own_domain(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.config.own_domains.iter().any(|own| {
            let own = own.to_ascii_lowercase();
            host == own || host.ends_with(&format!(".{own}"))
        })
    }

    pub async fn run(&self, raw_url: &str, target: &AcquireTarget) -> AcquireResult<Acquisition> {
        let url = self.check_url(raw_url)?;
        let host = url.host_str().unwrap_or_default().to_string();
        let strategies = self.registry.strategies_for(&host);

        // First strategy that sees metadata wins; the rest are not consulted.
        let mut metadata = MediaMetadata::default();
        for strategy in &strategies {
            match strategy.probe(&url).await {
                Ok(Some(found)) => {
                    debug!(strategy = strategy.name(), "probe returned metadata");
                    metadata = found;
                    break;
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(strategy = strategy.name(), error = %err, "probe failed");
                }
            }
        }

        if let Some(duration) = metadata.duration_seconds {
            let limit = self.config.max_duration_seconds;
            if limit > 0 && duration > limit as f64 {
                return Err(AcquireError::TooLong {
                    actual: duration.round() as u64,
                    limit,
                });
            }
        }

        for strategy in &strategies {
            info!(strategy = strategy.name(), host = %host, "attempting fetch");
            match strategy.fetch(&url, target).await {
                Ok(path) => {
                    if file_has_content(&path) {
                        info!(strategy = strategy.name(), path = %path.display(), "fetch succeeded");
                        return Ok(Acquisition {
                            source_path: path,
                            metadata,
                        });
                    }
                    warn!(
                        strategy = strategy.name(),
                        path = %path.display(),
                        "fetch reported success but produced no data"
                    );
                }
                Err(err @ (AcquireError::SelfOrigin | AcquireError::TooLong { .. })) => {
                    return Err(err)
                }
                Err(err) => {
                    warn!(strategy = strategy.name(), error = %err, "fetch failed");
                }
            }
        }

        Err(AcquireError::Exhausted(platform_hint(&host)))
    }
}

fn file_has_content(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.len() > 0)
        .unwrap_or(false)
}

pub(crate) async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> AcquireResult<()> {
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;

    let response = client.get(url).send().await?.error_for_status()?;
    let mut stream = response.bytes_stream();
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|source| AcquireError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    while let Some(chunk) = stream.next().await {
        let data = chunk?;
        file.write_all(&data)
            .await
            .map_err(|source| AcquireError::Io {
                path: path.to_path_buf(),
                source,
            })?;
    }
    file.flush().await.map_err(|source| AcquireError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

pub(crate) fn build_http_client(config: &AcquireSection) -> AcquireResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout());
    if let Some(proxy) = config.proxy() {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    Ok(builder.build()?)
}

/// User-facing failure message, worded per platform because the common
/// causes differ.
pub fn platform_hint(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    if host.contains("youtube.com") || host.contains("youtu.be") {
        "YouTube restricts automated downloads for this video. It may be age-restricted, private, or region-locked.".to_string()
    } else if host.contains("reddit.com") || host.contains("redd.it") {
        "Reddit did not expose a downloadable video. The post may be removed, image-only, or hosted on a third-party site.".to_string()
    } else {
        format!("No downloadable video was found at {host}. The page may require a login or stream from an unsupported player.")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn chain_with_domains(domains: &[&str]) -> AcquisitionChain {
        let config = AcquireSection {
            ytdlp_path: "yt-dlp".to_string(),
            own_domains: domains.iter().map(|s| s.to_string()).collect(),
            proxy_url: String::new(),
            rate_limit: String::new(),
            max_duration_seconds: 7200,
            timeout_seconds: 5,
            user_agent: "test-agent".to_string(),
        };
        AcquisitionChain::new(StrategyRegistry::empty(), config)
    }

    #[test]
    fn rejects_own_domain_and_subdomains() {
        let chain = chain_with_domains(&["clipforge.local"]);
        assert!(matches!(
            chain.check_url("https://clipforge.local/watch/abc"),
            Err(AcquireError::SelfOrigin)
        ));
        assert!(matches!(
            chain.check_url("https://cdn.clipforge.local/v/abc"),
            Err(AcquireError::SelfOrigin)
        ));
        assert!(matches!(
            chain.check_url("https://CLIPFORGE.LOCAL/v/abc"),
            Err(AcquireError::SelfOrigin)
        ));
    }

    #[test]
    fn accepts_unrelated_hosts() {
        let chain = chain_with_domains(&["clipforge.local"]);
        assert!(chain.check_url("https://example.com/video.mp4").is_ok());
        assert!(chain
            .check_url("https://notclipforge.local.example.org/x")
            .is_ok());
    }

    #[test]
    fn rejects_non_http_schemes() {
        let chain = chain_with_domains(&[]);
        assert!(matches!(
            chain.check_url("ftp://example.com/video.mp4"),
            Err(AcquireError::InvalidUrl(_))
        ));
        assert!(matches!(
            chain.check_url("not a url"),
            Err(AcquireError::InvalidUrl(_))
        ));
    }

    #[test]
    fn hints_are_platform_aware() {
        assert!(platform_hint("www.youtube.com").contains("YouTube"));
        assert!(platform_hint("old.reddit.com").contains("Reddit"));
        assert!(platform_hint("example.com").contains("example.com"));
    }

    struct ScriptedStrategy {
        name: &'static str,
        metadata: Option<MediaMetadata>,
        probes: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl AcquireStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn probe(&self, _url: &Url) -> AcquireResult<Option<MediaMetadata>> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(self.metadata.clone())
        }

        async fn fetch(&self, _url: &Url, target: &AcquireTarget) -> AcquireResult<PathBuf> {
            let path = target.with_extension("mp4");
            std::fs::write(&path, b"scripted payload").map_err(|source| AcquireError::Io {
                path: path.clone(),
                source,
            })?;
            Ok(path)
        }
    }

    #[tokio::test]
    async fn first_probe_with_metadata_wins() {
        let first_probes = Arc::new(AtomicUsize::new(0));
        let second_probes = Arc::new(AtomicUsize::new(0));
        let first: Arc<dyn AcquireStrategy> = Arc::new(ScriptedStrategy {
            name: "first",
            metadata: Some(MediaMetadata {
                title: Some("from first".to_string()),
                duration_seconds: Some(30.0),
                ..Default::default()
            }),
            probes: Arc::clone(&first_probes),
        });
        let second: Arc<dyn AcquireStrategy> = Arc::new(ScriptedStrategy {
            name: "second",
            metadata: Some(MediaMetadata {
                title: Some("from second".to_string()),
                ..Default::default()
            }),
            probes: Arc::clone(&second_probes),
        });

        let config = chain_with_domains(&[]).config;
        let registry = StrategyRegistry::new(Vec::new(), vec![first, second]);
        let chain = AcquisitionChain::new(registry, config);

        let dir = tempfile::tempdir().unwrap();
        let target = AcquireTarget::new(dir.path(), "aabbccdd");
        let acquisition = chain
            .run("https://example.com/watch/1", &target)
            .await
            .unwrap();

        assert_eq!(acquisition.metadata.title.as_deref(), Some("from first"));
        assert_eq!(first_probes.load(Ordering::SeqCst), 1);
        assert_eq!(second_probes.load(Ordering::SeqCst), 0);
    }
}
