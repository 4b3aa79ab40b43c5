use std::sync::Arc;

use crate::config::AcquireSection;
use crate::invoker::ToolInvoker;

use super::{AcquireStrategy, PageScrapeStrategy, RedditApiStrategy, YtDlpStrategy};

/// Maps a host to the ordered strategies worth attempting for it. Patterns
/// match the domain itself and any subdomain.
pub struct StrategyRegistry {
    rules: Vec<(String, Vec<Arc<dyn AcquireStrategy>>)>,
    fallback: Vec<Arc<dyn AcquireStrategy>>,
}

impl StrategyRegistry {
    pub fn new(
        rules: Vec<(String, Vec<Arc<dyn AcquireStrategy>>)>,
        fallback: Vec<Arc<dyn AcquireStrategy>>,
    ) -> Self {
        Self { rules, fallback }
    }

    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            fallback: Vec::new(),
        }
    }

    /// YouTube only ever works through yt-dlp, so scraping it is wasted
    /// effort. Reddit gets its JSON API between yt-dlp and the generic
    /// scrape. Everything else tries yt-dlp then the page scraper.
    pub fn standard(
        config: &AcquireSection,
        invoker: ToolInvoker,
        client: reqwest::Client,
    ) -> Self {
        let ytdlp: Arc<dyn AcquireStrategy> = Arc::new(YtDlpStrategy::new(config, invoker));
        let scrape: Arc<dyn AcquireStrategy> = Arc::new(PageScrapeStrategy::new(client.clone()));
        let reddit: Arc<dyn AcquireStrategy> = Arc::new(RedditApiStrategy::new(client));

        Self::new(
            vec![
                ("youtube.com".to_string(), vec![Arc::clone(&ytdlp)]),
                ("youtu.be".to_string(), vec![Arc::clone(&ytdlp)]),
                (
                    "reddit.com".to_string(),
                    vec![
                        Arc::clone(&ytdlp),
                        Arc::clone(&reddit),
                        Arc::clone(&scrape),
                    ],
                ),
                (
                    "redd.it".to_string(),
                    vec![Arc::clone(&ytdlp), reddit, Arc::clone(&scrape)],
                ),
            ],
            vec![ytdlp, scrape],
        )
    }

    pub fn strategies_for(&self, host: &str) -> Vec<Arc<dyn AcquireStrategy>> {
        let host = host.to_ascii_lowercase();
        for (pattern, strategies) in &self.rules {
            if host == *pattern || host.ends_with(&format!(".{pattern}")) {
                return strategies.clone();
            }
        }
        self.fallback.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use url::Url;

    use super::super::{AcquireResult, AcquireTarget, MediaMetadata};
    use super::*;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl AcquireStrategy for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn probe(&self, _url: &Url) -> AcquireResult<Option<MediaMetadata>> {
            Ok(None)
        }

        async fn fetch(&self, _url: &Url, target: &AcquireTarget) -> AcquireResult<PathBuf> {
            Ok(target.with_extension("mp4"))
        }
    }

    fn names(strategies: &[Arc<dyn AcquireStrategy>]) -> Vec<&'static str> {
        strategies.iter().map(|s| s.name()).collect()
    }

    #[test]
    fn matches_domain_and_subdomains() {
        let registry = StrategyRegistry::new(
            vec![("youtube.com".to_string(), vec![Arc::new(Named("tube"))])],
            vec![Arc::new(Named("fallback"))],
        );
        assert_eq!(names(&registry.strategies_for("youtube.com")), ["tube"]);
        assert_eq!(names(&registry.strategies_for("www.youtube.com")), ["tube"]);
        assert_eq!(names(&registry.strategies_for("m.YouTube.com")), ["tube"]);
        assert_eq!(
            names(&registry.strategies_for("notyoutube.com")),
            ["fallback"]
        );
    }
}
