use std::path::PathBuf;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::{
    fetch_to_file, AcquireError, AcquireResult, AcquireStrategy, AcquireTarget, MediaMetadata,
};

/// What a page's markup says about the video it embeds.
#[derive(Debug, Clone, Default)]
struct PageFindings {
    metadata: MediaMetadata,
    video_urls: Vec<String>,
}

/// Last-resort strategy: pull the page HTML, read Open Graph tags, and chase
/// any direct video URL the markup exposes.
pub struct PageScrapeStrategy {
    client: reqwest::Client,
}

impl PageScrapeStrategy {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn findings(&self, url: &Url) -> AcquireResult<PageFindings> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(parse_page(&body, url))
    }

}

/// Html is not Send, so parsing stays in a sync helper that returns owned
/// data before the caller awaits again.
fn parse_page(body: &str, base: &Url) -> PageFindings {
    let document = Html::parse_document(body);
    let mut findings = PageFindings::default();

    let meta_selector = match Selector::parse("meta[property], meta[name]") {
        Ok(selector) => selector,
        Err(_) => return findings,
    };
    for element in document.select(&meta_selector) {
        let key = element
            .value()
            .attr("property")
            .or_else(|| element.value().attr("name"))
            .unwrap_or_default();
        let Some(content) = element.value().attr("content") else {
            continue;
        };
        match key {
            "og:title" | "twitter:title" => {
                if findings.metadata.title.is_none() && !content.trim().is_empty() {
                    findings.metadata.title = Some(content.trim().to_string());
                }
            }
            "og:description" | "twitter:description" => {
                if findings.metadata.description.is_none() && !content.trim().is_empty() {
                    findings.metadata.description = Some(content.trim().to_string());
                }
            }
            "og:video" | "og:video:url" | "og:video:secure_url" | "twitter:player:stream" => {
                push_candidate(&mut findings.video_urls, content, base);
            }
            "og:video:width" => findings.metadata.width = content.parse().ok(),
            "og:video:height" => findings.metadata.height = content.parse().ok(),
            _ => {}
        }
    }

    if let Ok(source_selector) = Selector::parse("video source[src], video[src]") {
        for element in document.select(&source_selector) {
            if let Some(src) = element.value().attr("src") {
                push_candidate(&mut findings.video_urls, src, base);
            }
        }
    }

    // Sweep raw markup for direct file links the DOM walk missed, player
    // configs embedded in script blocks included.
    if let Ok(pattern) = Regex::new(r#"https?://[^\s"'<>\\]+\.mp4[^\s"'<>\\]*"#) {
        for found in pattern.find_iter(body) {
            push_candidate(&mut findings.video_urls, found.as_str(), base);
        }
    }

    // Best encoded quality first; candidates without a recognizable
    // resolution keep their discovery order after the ranked ones.
    findings
        .video_urls
        .sort_by_key(|url| std::cmp::Reverse(quality_hint(url)));

    findings
}

/// Reads a resolution-like number out of the file name, `clip_1080.mp4`
/// style. Zero when nothing in the name looks like a resolution.
fn quality_hint(video_url: &str) -> u32 {
    let path = video_url.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();
    name.split(|c: char| !c.is_ascii_digit())
        .filter_map(|digits| digits.parse::<u32>().ok())
        .filter(|n| (144..=4320).contains(n))
        .max()
        .unwrap_or(0)
}

fn push_candidate(candidates: &mut Vec<String>, raw: &str, base: &Url) {
    let resolved = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => match base.join(raw) {
            Ok(url) => url,
            Err(_) => return,
        },
    };
    if !matches!(resolved.scheme(), "http" | "https") {
        return;
    }
    let resolved = resolved.to_string();
    if !candidates.contains(&resolved) {
        candidates.push(resolved);
    }
}

fn extension_for(video_url: &str) -> &'static str {
    let path = video_url.split(['?', '#']).next().unwrap_or_default();
    if path.ends_with(".webm") {
        "webm"
    } else if path.ends_with(".mov") {
        "mov"
    } else {
        "mp4"
    }
}

#[async_trait::async_trait]
impl AcquireStrategy for PageScrapeStrategy {
    fn name(&self) -> &'static str {
        "page-scrape"
    }

    async fn probe(&self, url: &Url) -> AcquireResult<Option<MediaMetadata>> {
        let findings = self.findings(url).await?;
        if findings.metadata == MediaMetadata::default() {
            return Ok(None);
        }
        Ok(Some(findings.metadata))
    }

    async fn fetch(&self, url: &Url, target: &AcquireTarget) -> AcquireResult<PathBuf> {
        std::fs::create_dir_all(&target.dir).map_err(|source| AcquireError::Io {
            path: target.dir.clone(),
            source,
        })?;
        let findings = self.findings(url).await?;
        for video_url in &findings.video_urls {
            let path = target.with_extension(extension_for(video_url));
            match fetch_to_file(&self.client, video_url, &path).await {
                Ok(()) => return Ok(path),
                Err(err) => {
                    debug!(video_url = %video_url, error = %err, "candidate download failed");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Err(AcquireError::ToolFailed {
            tool: "page-scrape".to_string(),
            detail: format!(
                "no downloadable video among {} candidate(s)",
                findings.video_urls.len()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_graph_tags() {
        let base = Url::parse("https://example.com/watch/42").unwrap();
        let body = r#"
            <html><head>
                <meta property="og:title" content="Sample Clip" />
                <meta property="og:description" content="A short test." />
                <meta property="og:video:secure_url" content="https://cdn.example.com/v/42.mp4" />
                <meta property="og:video:height" content="720" />
            </head><body></body></html>
        "#;
        let findings = parse_page(body, &base);
        assert_eq!(findings.metadata.title.as_deref(), Some("Sample Clip"));
        assert_eq!(findings.metadata.height, Some(720));
        assert_eq!(findings.video_urls, ["https://cdn.example.com/v/42.mp4"]);
    }

    #[test]
    fn resolves_relative_sources_and_sweeps_scripts() {
        let base = Url::parse("https://example.com/watch/42").unwrap();
        let body = r#"
            <html><body>
                <video><source src="/media/clip.webm"></video>
                <script>var player = {"file": "https://cdn.example.com/raw/clip.mp4?sig=abc"};</script>
            </body></html>
        "#;
        let findings = parse_page(body, &base);
        assert!(findings
            .video_urls
            .contains(&"https://example.com/media/clip.webm".to_string()));
        assert!(findings
            .video_urls
            .contains(&"https://cdn.example.com/raw/clip.mp4?sig=abc".to_string()));
    }

    #[test]
    fn candidates_rank_by_descending_resolution() {
        let base = Url::parse("https://example.com/watch/42").unwrap();
        let body = r#"
            <html><body>
                <video><source src="https://cdn.example.com/v/clip_360.mp4"></video>
                <video><source src="https://cdn.example.com/v/clip_1080.mp4"></video>
                <script>var alt = "https://cdn.example.com/v/clip_720.mp4";</script>
            </body></html>
        "#;
        let findings = parse_page(body, &base);
        assert_eq!(
            findings.video_urls,
            [
                "https://cdn.example.com/v/clip_1080.mp4",
                "https://cdn.example.com/v/clip_720.mp4",
                "https://cdn.example.com/v/clip_360.mp4",
            ]
        );
    }

    #[test]
    fn quality_hint_ignores_non_resolution_digits() {
        assert_eq!(quality_hint("https://x/v/clip_1080.mp4?sig=9999999"), 1080);
        assert_eq!(quality_hint("https://x/v/42.mp4"), 0);
        assert_eq!(quality_hint("https://x/v/stream"), 0);
    }

    #[test]
    fn extension_for_recognizes_known_suffixes() {
        assert_eq!(extension_for("https://x/y.webm?sig=1"), "webm");
        assert_eq!(extension_for("https://x/y.mp4"), "mp4");
        assert_eq!(extension_for("https://x/stream"), "mp4");
    }
}
