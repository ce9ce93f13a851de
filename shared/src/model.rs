use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::image_processing::DecodedImage;
use crate::normalize::{Detection, NormalizedResult, VideoStats};
use crate::overlay::{Canvas, DrawOp, Surface};
use crate::AppError;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Image,
    Video,
}

impl Mode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// The browse dialog filter for this mode.
    #[must_use]
    pub const fn accept(self) -> &'static str {
        match self {
            Self::Image => "image/*",
            Self::Video => "video/*",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Video => "Video",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewId(Uuid);

impl PreviewId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PreviewId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PreviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "preview-{}", self.0)
    }
}

/// The single file the session is working on.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub media_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, media_type: Option<&str>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_ascii_lowercase),
            bytes: bytes.into(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Lowercased extension of the file name, without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

// File contents stay out of logs.
impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreviewHandle {
    /// Transient reference owned by the shell until released.
    Image { id: PreviewId },
    /// Videos are previewed by name only.
    Video { name: String },
}

impl PreviewHandle {
    #[must_use]
    pub fn image_id(&self) -> Option<&PreviewId> {
        match self {
            Self::Image { id } => Some(id),
            Self::Video { .. } => None,
        }
    }
}

/// Which submission a response belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionTicket {
    pub generation: u64,
    pub mode: Mode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendStatus {
    Online(String),
    Offline(String),
}

impl BackendStatus {
    #[must_use]
    pub const fn is_online(&self) -> bool {
        matches!(self, Self::Online(_))
    }
}

#[derive(Debug, Default)]
pub struct Model {
    pub mode: Mode,
    pub file: Option<UploadedFile>,
    pub preview: Option<PreviewHandle>,
    pub result: Option<NormalizedResult>,
    pub video_stats: Option<VideoStats>,

    // Submissions
    pub in_flight: usize,
    pub generation: u64,

    // Drawing surface and what is painted on it
    pub base_image: Option<DecodedImage>,
    pub detections: Vec<Detection>,
    pub surface: Canvas,

    pub active_error: Option<AppError>,
    pub backend_status: Option<BackendStatus>,
    pub config: ClientConfig,
}

impl Model {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    /// Drops file, preview, result and everything painted. Returns the preview
    /// reference that must now be released.
    pub fn reset(&mut self) -> Option<PreviewId> {
        let released = self.retire_file();
        self.surface.clear();
        released
    }

    /// Forgets the current file and whatever was derived from it, without
    /// touching the surface. Bumping the generation retires every outstanding
    /// submission.
    pub(crate) fn retire_file(&mut self) -> Option<PreviewId> {
        self.file = None;
        self.result = None;
        self.video_stats = None;
        self.base_image = None;
        self.detections.clear();
        self.generation = self.generation.wrapping_add(1);
        self.preview.take().and_then(|p| p.image_id().cloned())
    }

    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    pub(crate) fn next_ticket(&mut self) -> SubmissionTicket {
        self.generation = self.generation.wrapping_add(1);
        SubmissionTicket {
            generation: self.generation,
            mode: self.mode,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PreviewView {
    Image { id: String },
    Video { name: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultView {
    pub result: NormalizedResult,
    /// Playable reference for the annotated clip.
    pub video_src: Option<String>,
    pub stream_src: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.user_facing_message(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub mode: Mode,
    pub file_name: Option<String>,
    pub preview: Option<PreviewView>,
    pub drop_prompt: String,
    pub accept: String,
    pub is_busy: bool,
    pub detect_label: String,
    pub result: Option<ResultView>,
    pub video_stats: Option<VideoStats>,
    pub surface_width: u32,
    pub surface_height: u32,
    /// Draw calls since the surface was last cleared, in paint order.
    pub overlay: Vec<DrawOp>,
    pub error: Option<UserFacingError>,
    pub backend_status: Option<BackendStatus>,
}

impl ViewModel {
    /// Detection boxes currently drawn.
    #[must_use]
    pub fn box_count(&self) -> usize {
        self.overlay
            .iter()
            .filter(|op| matches!(op, DrawOp::StrokeRect { .. }))
            .count()
    }

    /// Label texts in draw order.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.overlay
            .iter()
            .filter_map(|op| match op {
                DrawOp::FillText { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}
