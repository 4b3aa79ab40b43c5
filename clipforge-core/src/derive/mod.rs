mod error;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageBuffer, Rgb};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{ArtifactLayout, DeriveSection, NORMALIZED_SUBDIR};
use crate::invoker::{CommandExecutor, ToolInvoker, ToolOutput};
use crate::media::{MediaItem, SqliteMediaStore};

pub use error::{DeriveError, DeriveResult};
pub use types::{DerivationReport, ProbeSummary, StageMethod, StageName, StageOutcome};

use types::FfprobeOutput;

// 1x1 gray baseline JPEG, served when even the rendered placeholder cannot
// be written.
const MINIMAL_JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0xFF, 0xC0, 0x00, 0x0B,
    0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00, 0xFF, 0xC4, 0x00, 0x14, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x08, 0xFF, 0xC4, 0x00, 0x14, 0x10, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xDA, 0x00, 0x08,
    0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0x7F, 0xFF, 0xD9,
];

/// Produces every derived artifact for one media item: probed metadata, a
/// thumbnail, a normalized mp4, and an HLS rendition. Each stage commits its
/// result to the store before the next runs, so a crash mid-chain loses at
/// most the stage in flight.
pub struct DerivationChain {
    store: SqliteMediaStore,
    layout: ArtifactLayout,
    config: DeriveSection,
    probe: ToolInvoker,
    ffmpeg: ToolInvoker,
}

impl DerivationChain {
    pub fn new(
        store: SqliteMediaStore,
        layout: ArtifactLayout,
        config: DeriveSection,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let probe = ToolInvoker::new(Arc::clone(&executor), config.probe_timeout());
        let ffmpeg = ToolInvoker::new(executor, config.transcode_timeout());
        Self {
            store,
            layout,
            config,
            probe,
            ffmpeg,
        }
    }

    pub async fn run(&self, item: &MediaItem) -> DeriveResult<DerivationReport> {
        let source_rel = item
            .source_path
            .as_deref()
            .ok_or_else(|| DeriveError::MissingSource {
                slug: item.slug.clone(),
            })?;
        let source = self.layout.resolve(source_rel);
        let mut stages = Vec::new();

        let (summary, outcome) = self.probe_stage(item, &source).await?;
        stages.push(outcome);

        stages.push(self.thumbnail_stage(item, &source, &summary).await?);

        let normalized = self.normalize_stage(item, &source).await?;
        stages.push(normalized.1);

        stages.push(self.segment_stage(item, &normalized.0, &summary).await?);

        info!(slug = %item.slug, stages = stages.len(), "derivation chain complete");
        Ok(DerivationReport {
            slug: item.slug.clone(),
            probe: summary,
            stages,
        })
    }

    /// Never fatal. A source ffprobe cannot read still gets zeroed metadata
    /// and continues through the chain.
    async fn probe_stage(
        &self,
        item: &MediaItem,
        source: &Path,
    ) -> DeriveResult<(ProbeSummary, StageOutcome)> {
        let size_bytes = tokio::fs::metadata(source)
            .await
            .ok()
            .map(|meta| meta.len() as i64);

        let (summary, outcome) = match self.run_ffprobe(source).await {
            Ok(Some(output)) => {
                let stream = output.video_stream();
                let summary = ProbeSummary {
                    duration_s: output.duration_seconds(),
                    width: stream.and_then(|s| s.width),
                    height: stream.and_then(|s| s.height),
                    size_bytes,
                };
                (summary, StageOutcome::primary(StageName::Probe))
            }
            Ok(None) => (
                ProbeSummary {
                    size_bytes,
                    ..Default::default()
                },
                StageOutcome::fallback(StageName::Probe, "ffprobe produced no usable data"),
            ),
            Err(detail) => (
                ProbeSummary {
                    size_bytes,
                    ..Default::default()
                },
                StageOutcome::fallback(StageName::Probe, detail),
            ),
        };

        self.store.set_metadata(
            item.id,
            summary.duration_s,
            summary.width,
            summary.height,
            summary.size_bytes,
        )?;
        if let Some(stem) = source.file_stem().and_then(|s| s.to_str()) {
            self.store.set_default_title(item.id, stem)?;
        }
        Ok((summary, outcome))
    }

    async fn run_ffprobe(&self, source: &Path) -> Result<Option<FfprobeOutput>, String> {
        let mut command = Command::new(&self.config.ffprobe_path);
        command
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(source);
        match self.probe.run(&mut command).await {
            Ok(output) if output.success() => {
                match serde_json::from_slice::<FfprobeOutput>(&output.stdout) {
                    Ok(parsed) => Ok(Some(parsed)),
                    Err(err) => Err(format!("unparseable ffprobe json: {err}")),
                }
            }
            Ok(output) => {
                warn!(stderr = %output.stderr_utf8(), "ffprobe returned non-zero status");
                Ok(None)
            }
            Err(err) => Err(err.to_string()),
        }
    }

    async fn thumbnail_stage(
        &self,
        item: &MediaItem,
        source: &Path,
        summary: &ProbeSummary,
    ) -> DeriveResult<StageOutcome> {
        let rel = self.layout.thumbnail_rel(&item.slug);
        let dest = self.layout.resolve(&rel);
        ensure_parent(&dest).await?;

        let seek = thumbnail_seek(summary.duration_s);
        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .arg("-y")
            .arg("-ss")
            .arg(format!("{seek:.2}"))
            .arg("-i")
            .arg(source)
            .arg("-vframes")
            .arg("1")
            .arg("-q:v")
            .arg("2")
            .arg(&dest);

        let outcome = match self.run_ffmpeg(&mut command).await {
            Ok(()) => StageOutcome::primary(StageName::Thumbnail),
            Err(detail) => {
                warn!(slug = %item.slug, detail = %detail, "thumbnail extraction failed, generating placeholder");
                self.write_placeholder(&dest)?;
                StageOutcome::fallback(StageName::Thumbnail, detail)
            }
        };
        self.store.set_thumbnail_path(item.id, &rel)?;
        Ok(outcome)
    }

    fn write_placeholder(&self, dest: &Path) -> DeriveResult<()> {
        let mut buffer = ImageBuffer::<Rgb<u8>, Vec<u8>>::new(640, 360);
        for (x, y, pixel) in buffer.enumerate_pixels_mut() {
            let fx = x as f32 / 640.0;
            let fy = y as f32 / 360.0;
            *pixel = Rgb([
                (24.0 + 72.0 * fx) as u8,
                (24.0 + 56.0 * (1.0 - fx)) as u8,
                (36.0 + 48.0 * fy) as u8,
            ]);
        }
        if let Err(err) = buffer.save(dest) {
            // Last resort: an item must never finish without a thumbnail file.
            warn!(error = %err, "placeholder render failed, writing stock jpeg");
            std::fs::write(dest, MINIMAL_JPEG).map_err(|source| DeriveError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    async fn normalize_stage(
        &self,
        item: &MediaItem,
        source: &Path,
    ) -> DeriveResult<(PathBuf, StageOutcome)> {
        let rel = self.layout.normalized_rel(&item.slug);
        let dest = self.layout.resolve(&rel);
        ensure_parent(&dest).await?;

        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg(&self.config.preset)
            .arg("-crf")
            .arg(self.config.crf.to_string())
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(&self.config.audio_bitrate)
            .arg("-movflags")
            .arg("+faststart")
            .arg(&dest);

        let outcome = match self.run_ffmpeg(&mut command).await {
            Ok(()) => StageOutcome::primary(StageName::Normalize),
            Err(detail) => {
                warn!(slug = %item.slug, detail = %detail, "transcode failed, copying source as-is");
                tokio::fs::copy(source, &dest)
                    .await
                    .map_err(|source_err| DeriveError::Normalize {
                        slug: item.slug.clone(),
                        detail: format!("{detail}; copy fallback failed: {source_err}"),
                    })?;
                StageOutcome::fallback(StageName::Normalize, detail)
            }
        };
        self.store.set_normalized_path(item.id, &rel)?;
        Ok((dest, outcome))
    }

    async fn segment_stage(
        &self,
        item: &MediaItem,
        normalized: &Path,
        summary: &ProbeSummary,
    ) -> DeriveResult<StageOutcome> {
        let rel = self.layout.hls_playlist_rel(&item.slug);
        let playlist = self.layout.resolve(&rel);
        let dir = self.layout.hls_item_dir(&item.slug);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| DeriveError::Io {
                path: dir.clone(),
                source,
            })?;

        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .arg("-y")
            .arg("-i")
            .arg(normalized)
            .arg("-c:v")
            .arg("libx264")
            .arg("-profile:v")
            .arg("baseline")
            .arg("-level")
            .arg("3.0")
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(&self.config.audio_bitrate)
            .arg("-g")
            .arg(self.config.keyint.to_string())
            .arg("-sc_threshold")
            .arg("0")
            .arg("-hls_time")
            .arg(self.config.hls_segment_seconds.to_string())
            .arg("-hls_list_size")
            .arg("0")
            .arg("-hls_segment_type")
            .arg("mpegts")
            .arg("-hls_flags")
            .arg("independent_segments")
            .arg("-hls_segment_filename")
            .arg(dir.join("segment_%03d.ts"))
            .arg(&playlist);

        let outcome = match self.run_ffmpeg(&mut command).await {
            Ok(()) => StageOutcome::primary(StageName::Segment),
            Err(detail) => {
                warn!(slug = %item.slug, detail = %detail, "hls segmentation failed, writing single-entry playlist");
                let body = single_entry_playlist(&item.slug, summary.duration_s);
                tokio::fs::write(&playlist, body)
                    .await
                    .map_err(|source| DeriveError::Io {
                        path: playlist.clone(),
                        source,
                    })?;
                StageOutcome::fallback(StageName::Segment, detail)
            }
        };
        self.store.set_hls_path(item.id, &rel)?;
        Ok(outcome)
    }

    /// Success means the tool exited zero and wrote a non-empty final
    /// argument. Everything else is a fallback trigger, tool-missing and
    /// timeouts included.
    async fn run_ffmpeg(&self, command: &mut Command) -> Result<(), String> {
        let dest: Option<PathBuf> = command
            .as_std()
            .get_args()
            .last()
            .map(|arg| PathBuf::from(arg));
        match self.ffmpeg.run(command).await {
            Ok(output) if output.success() => {
                if let Some(dest) = dest {
                    let written = std::fs::metadata(&dest)
                        .map(|meta| meta.len() > 0)
                        .unwrap_or(false);
                    if !written {
                        return Err("ffmpeg exited zero but wrote no output".to_string());
                    }
                }
                Ok(())
            }
            Ok(output) => Err(last_stderr_line(&output)),
            Err(err) => Err(err.to_string()),
        }
    }
}

fn last_stderr_line(output: &ToolOutput) -> String {
    output
        .stderr_utf8()
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("ffmpeg failed without output")
        .trim()
        .to_string()
}

/// Frame offset for the thumbnail grab. A quarter of the way in, clamped to
/// the 1s..5s window; when the duration is unknown the first frame is the
/// only safe choice.
fn thumbnail_seek(duration_s: Option<f64>) -> f64 {
    match duration_s {
        Some(duration) if duration > 0.0 => (duration * 0.25).clamp(1.0, 5.0),
        _ => 0.0,
    }
}

/// VOD playlist with the whole normalized file as its only segment. Players
/// accept it; seeking is just coarser than a segmented rendition.
fn single_entry_playlist(slug: &str, duration_s: Option<f64>) -> String {
    let duration = duration_s.unwrap_or(0.0).max(0.0);
    let target = duration.ceil().max(1.0) as u64;
    let mut playlist = String::new();
    playlist.push_str("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:3\n");
    playlist.push_str(&format!("#EXT-X-TARGETDURATION:{target}\n"));
    playlist.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    playlist.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    playlist.push_str(&format!("#EXTINF:{duration:.3},\n"));
    playlist.push_str(&format!("../../{NORMALIZED_SUBDIR}/{slug}.mp4\n"));
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

async fn ensure_parent(path: &Path) -> DeriveResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DeriveError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    Ok(())
}
