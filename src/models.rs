use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use thiserror::Error;
use uuid::Uuid;

pub const SAMPLES_RANGE: RangeInclusive<u8> = 1..=4;
pub const STEPS_RANGE: RangeInclusive<u16> = 30..=500;
pub const MIN_GUIDANCE_SCALE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    #[default]
    Square,
    Portrait,
    Landscape,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [Self::Square, Self::Portrait, Self::Landscape];
}

/// Artistic style tags accepted by the SDXL-Base endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Style {
    #[default]
    Anime,
    Enhance,
    Photographic,
    DigitalArt,
    ComicBook,
    FantasyArt,
    AnalogFilm,
    Neonpunk,
    Isometric,
    Lowpoly,
    Origami,
    LineArt,
    CraftClay,
    Cinematic,
    #[serde(rename = "3d-model")]
    ThreeDModel,
    PixelArt,
    Texture,
    Futuristic,
    Realism,
    Watercolor,
    Photorealistic,
}

impl Style {
    pub const ALL: [Style; 21] = [
        Self::Anime,
        Self::Enhance,
        Self::Photographic,
        Self::DigitalArt,
        Self::ComicBook,
        Self::FantasyArt,
        Self::AnalogFilm,
        Self::Neonpunk,
        Self::Isometric,
        Self::Lowpoly,
        Self::Origami,
        Self::LineArt,
        Self::CraftClay,
        Self::Cinematic,
        Self::ThreeDModel,
        Self::PixelArt,
        Self::Texture,
        Self::Futuristic,
        Self::Realism,
        Self::Watercolor,
        Self::Photorealistic,
    ];
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("samples must be between 1 and 4, got {0}")]
    Samples(u8),
    #[error("steps must be between 30 and 500, got {0}")]
    Steps(u16),
    #[error("guidance_scale must be a finite number >= 0.0, got {0}")]
    GuidanceScale(f64),
}

/// Body of `POST /v1/generate/sdxl-base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(rename = "negprompt")]
    pub negative_prompt: String,
    pub aspect_ratio: AspectRatio,
    pub style: Style,
    pub enhance: bool,
    pub optimize: bool,
    pub safe_filter: bool,
    pub samples: u8,
    pub seed: u64,
    pub steps: u16,
    pub guidance_scale: f64,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: "A beautiful landscape with a river and mountains".to_string(),
            negative_prompt: "deformed, bad anatomy, disfigured, poorly drawn face".to_string(),
            aspect_ratio: AspectRatio::default(),
            style: Style::default(),
            enhance: false,
            optimize: false,
            safe_filter: false,
            samples: 1,
            seed: 1234,
            steps: 50,
            guidance_scale: 7.5,
        }
    }
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !SAMPLES_RANGE.contains(&self.samples) {
            return Err(ValidationError::Samples(self.samples));
        }
        if !STEPS_RANGE.contains(&self.steps) {
            return Err(ValidationError::Steps(self.steps));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale < MIN_GUIDANCE_SCALE {
            return Err(ValidationError::GuidanceScale(self.guidance_scale));
        }
        Ok(())
    }
}

/// Accepted-job answer of the generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub process_id: String,
    pub status_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    InQueue,
    InProgress,
    Completed,
    Other(String),
}

impl From<String> for JobState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "IN_QUEUE" => Self::InQueue,
            "IN_PROGRESS" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            _ => Self::Other(value),
        }
    }
}

/// One decoded answer of the status endpoint.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: JobState,
    pub output: Vec<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    result: Option<StatusResult>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct StatusResult {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    output: Vec<String>,
}

impl StatusSnapshot {
    /// Fails when the body is not JSON or carries no string `status`.
    pub fn decode(body: &str) -> Result<Self, serde_json::Error> {
        let raw: serde_json::Value = serde_json::from_str(body)?;
        let parsed = StatusBody::deserialize(&raw)?;
        Ok(Self {
            state: parsed.status.into(),
            output: parsed.result.unwrap_or_default().output,
            raw,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum JobEvent {
    Submitted { process_id: String },
    Progress(u8),
    Image(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub process_id: Option<String>,
    pub images: Vec<String>,
    pub events: Vec<JobEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
