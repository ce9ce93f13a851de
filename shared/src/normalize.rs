//! Maps the two backend response shapes into one display-ready result.
//!
//! Image responses are summarized locally (mean confidence and a verdict
//! derived from the detection count). Video responses are already summarized
//! by the backend and pass through untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Mode;
use crate::{to_fixed, VERDICT_NOT_WORN, VERDICT_WORN};

/// Digits kept when the mean confidence is rendered.
pub const AVG_CONFIDENCE_DIGITS: usize = 3;

/// One predicted box in source-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub confidence: f64,
}

impl Detection {
    #[must_use]
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetectionResponse {
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helmets_detected: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawVideoResponse {
    pub verdict: String,
    pub avg_confidence: f64,
    pub helmet_presence_ratio: f64,
    pub video_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames_with_helmet: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_timeline: Option<Vec<f64>>,
}

impl RawVideoResponse {
    #[must_use]
    pub fn stats(&self) -> Option<VideoStats> {
        if self.total_frames.is_none()
            && self.frames_with_helmet.is_none()
            && self.confidence_timeline.is_none()
        {
            return None;
        }
        Some(VideoStats {
            total_frames: self.total_frames,
            frames_with_helmet: self.frames_with_helmet,
            confidence_timeline: self.confidence_timeline.clone().unwrap_or_default(),
        })
    }
}

/// Per-frame figures the video endpoint reports next to its summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStats {
    pub total_frames: Option<u64>,
    pub frames_with_helmet: Option<u64>,
    pub confidence_timeline: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RawResponse {
    Image(RawDetectionResponse),
    Video(RawVideoResponse),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response body is not valid JSON: {reason}")]
    MalformedJson { reason: String },

    #[error("response body does not match the {mode} result shape: {reason}")]
    UnexpectedShape { mode: Mode, reason: String },

    #[error("backend rejected the upload: {message}")]
    BackendRejected { message: String },
}

impl RawResponse {
    /// Parses a success body for the given mode. A body carrying an `error`
    /// field is the backend refusing the upload, whatever the status said.
    pub fn parse(mode: Mode, body: &[u8]) -> Result<Self, ParseError> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| ParseError::MalformedJson {
                reason: e.to_string(),
            })?;

        if let Some(message) = value.get("error").and_then(serde_json::Value::as_str) {
            return Err(ParseError::BackendRejected {
                message: message.to_string(),
            });
        }

        let shape_error = |e: serde_json::Error| ParseError::UnexpectedShape {
            mode,
            reason: e.to_string(),
        };

        match mode {
            Mode::Image => serde_json::from_value(value)
                .map(RawResponse::Image)
                .map_err(shape_error),
            Mode::Video => serde_json::from_value(value)
                .map(RawResponse::Video)
                .map_err(shape_error),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        match self {
            Self::Image(_) => Mode::Image,
            Self::Video(_) => Mode::Video,
        }
    }
}

/// Display-ready result. The variant is the mode it was produced for, so
/// video-only fields cannot appear on an image result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum NormalizedResult {
    Image {
        verdict: String,
        avg_confidence: String,
    },
    Video {
        verdict: String,
        avg_confidence: f64,
        helmet_presence_ratio: f64,
        video_url: String,
    },
}

impl NormalizedResult {
    #[must_use]
    pub const fn mode(&self) -> Mode {
        match self {
            Self::Image { .. } => Mode::Image,
            Self::Video { .. } => Mode::Video,
        }
    }

    #[must_use]
    pub fn verdict(&self) -> &str {
        match self {
            Self::Image { verdict, .. } | Self::Video { verdict, .. } => verdict,
        }
    }

    /// Mean confidence as shown in the result panel.
    #[must_use]
    pub fn avg_confidence_text(&self) -> String {
        match self {
            Self::Image { avg_confidence, .. } => avg_confidence.clone(),
            Self::Video { avg_confidence, .. } => avg_confidence.to_string(),
        }
    }

    #[must_use]
    pub fn video_url(&self) -> Option<&str> {
        match self {
            Self::Image { .. } => None,
            Self::Video { video_url, .. } => Some(video_url),
        }
    }
}

/// Arithmetic mean, zero for an empty slice.
#[must_use]
pub fn mean_confidence(detections: &[Detection]) -> f64 {
    if detections.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = detections.len() as f64;
    detections.iter().map(|d| d.confidence).sum::<f64>() / count
}

#[must_use]
pub fn normalize(raw: &RawResponse) -> NormalizedResult {
    match raw {
        RawResponse::Image(response) => {
            if let Some(reported) = response.helmets_detected {
                if usize::try_from(reported).ok() != Some(response.detections.len()) {
                    warn!(
                        reported,
                        received = response.detections.len(),
                        "helmets_detected disagrees with detection list"
                    );
                }
            }

            // Any detection counts as a worn helmet; there is no class label.
            let verdict = if response.detections.is_empty() {
                VERDICT_NOT_WORN
            } else {
                VERDICT_WORN
            };
            let avg = mean_confidence(&response.detections);
            debug!(count = response.detections.len(), avg, "image result normalized");

            NormalizedResult::Image {
                verdict: verdict.to_string(),
                avg_confidence: to_fixed(avg, AVG_CONFIDENCE_DIGITS),
            }
        }
        RawResponse::Video(response) => NormalizedResult::Video {
            verdict: response.verdict.clone(),
            avg_confidence: response.avg_confidence,
            helmet_presence_ratio: response.helmet_presence_ratio,
            video_url: response.video_url.clone(),
        },
    }
}
