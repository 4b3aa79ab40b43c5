use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{
    fetch_to_file, AcquireError, AcquireResult, AcquireStrategy, AcquireTarget, MediaMetadata,
};

/// Reads a Reddit post through its `.json` endpoint and downloads the hosted
/// video's fallback rendition. Covers v.redd.it posts that yt-dlp sometimes
/// refuses when the audio track is missing.
pub struct RedditApiStrategy {
    client: reqwest::Client,
}

#[derive(Debug, Clone, Default)]
struct PostDetails {
    metadata: MediaMetadata,
    video_urls: Vec<String>,
}

impl RedditApiStrategy {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post_details(&self, url: &Url) -> AcquireResult<PostDetails> {
        let api_url = json_endpoint(url);
        let response = self
            .client
            .get(&api_url)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        Ok(extract_details(&body))
    }
}

fn json_endpoint(url: &Url) -> String {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    let trimmed = base.as_str().trim_end_matches('/').to_string();
    format!("{trimmed}.json")
}

fn extract_details(body: &Value) -> PostDetails {
    let mut details = PostDetails::default();
    let Some(post) = body
        .get(0)
        .and_then(|listing| listing.pointer("/data/children/0/data"))
    else {
        return details;
    };

    details.metadata.title = post
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string);
    details.metadata.description = post
        .get("selftext")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string);

    for media_key in ["secure_media", "media"] {
        if let Some(video) = post.pointer(&format!("/{media_key}/reddit_video")) {
            collect_video(video, &mut details);
        }
    }
    if let Some(video) = post.pointer("/preview/reddit_video_preview") {
        collect_video(video, &mut details);
    }
    if let Some(direct) = post.get("url").and_then(Value::as_str) {
        if direct.split(['?', '#']).next().unwrap_or_default().ends_with(".mp4") {
            push_unique(&mut details.video_urls, direct);
        }
    }
    details
}

/// Rendition heights v.redd.it publishes alongside the fallback. Tried from
/// the top so the best available quality lands first.
const DASH_LADDER: [u32; 5] = [1080, 720, 480, 360, 240];

/// Expands a `DASH_<height>.mp4` fallback URL into the rendition ladder at
/// or below its height, best first. Non-DASH URLs expand to nothing.
fn dash_renditions(fallback_url: &str) -> Vec<String> {
    let clean = fallback_url
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let Some(idx) = clean.rfind("/DASH_") else {
        return Vec::new();
    };
    let (base, name) = clean.split_at(idx + "/DASH_".len());
    let Some(height) = name
        .strip_suffix(".mp4")
        .and_then(|digits| digits.parse::<u32>().ok())
    else {
        return Vec::new();
    };
    DASH_LADDER
        .iter()
        .filter(|&&rung| rung <= height)
        .map(|rung| format!("{base}{rung}.mp4"))
        .collect()
}

fn collect_video(video: &Value, details: &mut PostDetails) {
    if let Some(fallback) = video.get("fallback_url").and_then(Value::as_str) {
        for rendition in dash_renditions(fallback) {
            push_unique(&mut details.video_urls, &rendition);
        }
        // Keep the verbatim fallback last in case the ladder guesses wrong.
        push_unique(&mut details.video_urls, fallback);
    }
    if details.metadata.duration_seconds.is_none() {
        details.metadata.duration_seconds = video.get("duration").and_then(Value::as_f64);
    }
    if details.metadata.width.is_none() {
        details.metadata.width = video.get("width").and_then(Value::as_i64);
    }
    if details.metadata.height.is_none() {
        details.metadata.height = video.get("height").and_then(Value::as_i64);
    }
}

fn push_unique(candidates: &mut Vec<String>, raw: &str) {
    let cleaned = raw.replace("&amp;", "&");
    if !candidates.contains(&cleaned) {
        candidates.push(cleaned);
    }
}

#[async_trait::async_trait]
impl AcquireStrategy for RedditApiStrategy {
    fn name(&self) -> &'static str {
        "reddit-api"
    }

    async fn probe(&self, url: &Url) -> AcquireResult<Option<MediaMetadata>> {
        let details = self.post_details(url).await?;
        if details.metadata == MediaMetadata::default() {
            return Ok(None);
        }
        Ok(Some(details.metadata))
    }

    async fn fetch(&self, url: &Url, target: &AcquireTarget) -> AcquireResult<PathBuf> {
        std::fs::create_dir_all(&target.dir).map_err(|source| AcquireError::Io {
            path: target.dir.clone(),
            source,
        })?;
        let details = self.post_details(url).await?;
        for video_url in &details.video_urls {
            let path = target.with_extension("mp4");
            match fetch_to_file(&self.client, video_url, &path).await {
                Ok(()) => return Ok(path),
                Err(err) => {
                    debug!(video_url = %video_url, error = %err, "rendition download failed");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Err(AcquireError::ToolFailed {
            tool: "reddit-api".to_string(),
            detail: format!(
                "no downloadable rendition among {} candidate(s)",
                details.video_urls.len()
            ),
        })
    }
}
