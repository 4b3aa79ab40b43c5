use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Probe,
    Thumbnail,
    Normalize,
    Segment,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Probe => "probe",
            StageName::Thumbnail => "thumbnail",
            StageName::Normalize => "normalize",
            StageName::Segment => "segment",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a stage succeeded with its preferred tool or fell back to the
/// degraded path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMethod {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: StageName,
    pub method: StageMethod,
    pub detail: Option<String>,
}

impl StageOutcome {
    pub fn primary(stage: StageName) -> Self {
        Self {
            stage,
            method: StageMethod::Primary,
            detail: None,
        }
    }

    pub fn fallback(stage: StageName, detail: impl Into<String>) -> Self {
        Self {
            stage,
            method: StageMethod::Fallback,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeSummary {
    pub duration_s: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivationReport {
    pub slug: String,
    pub probe: ProbeSummary,
    pub stages: Vec<StageOutcome>,
}

impl DerivationReport {
    pub fn fully_primary(&self) -> bool {
        self.stages
            .iter()
            .all(|outcome| outcome.method == StageMethod::Primary)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FfprobeStream {
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub avg_frame_rate: Option<String>,
    #[serde(default)]
    pub r_frame_rate: Option<String>,
    #[serde(default)]
    pub nb_frames: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FfprobeFormat {
    #[serde(default)]
    pub duration: Option<String>,
}

pub(crate) fn parse_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    if rate.contains('/') {
        let mut parts = rate.split('/');
        let numerator = parts.next()?.parse::<f64>().ok()?;
        let denominator = parts.next()?.parse::<f64>().ok()?;
        if denominator == 0.0 {
            return None;
        }
        Some(numerator / denominator)
    } else {
        rate.parse::<f64>().ok()
    }
}

impl FfprobeOutput {
    pub(crate) fn video_stream(&self) -> Option<&FfprobeStream> {
        self.streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some("video"))
    }

    /// Container duration when present, otherwise frames divided by frame
    /// rate from the video stream.
    pub(crate) fn duration_seconds(&self) -> Option<f64> {
        if let Some(duration) = self
            .format
            .duration
            .as_deref()
            .and_then(|value| value.parse::<f64>().ok())
        {
            if duration > 0.0 {
                return Some(duration);
            }
        }
        let stream = self.video_stream()?;
        if let Some(duration) = stream
            .duration
            .as_deref()
            .and_then(|value| value.parse::<f64>().ok())
        {
            if duration > 0.0 {
                return Some(duration);
            }
        }
        let frames = stream
            .nb_frames
            .as_deref()
            .and_then(|value| value.parse::<f64>().ok())?;
        let rate = parse_rate(stream.avg_frame_rate.as_deref())
            .or_else(|| parse_rate(stream.r_frame_rate.as_deref()))?;
        if rate > 0.0 && frames > 0.0 {
            Some(frames / rate)
        } else {
            None
        }
    }
}
