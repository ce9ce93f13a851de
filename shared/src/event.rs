use crate::capabilities::{DecodeOutput, HttpResult};
use crate::config::ClientConfig;
use crate::model::{Mode, PreviewId, SubmissionTicket, UploadedFile};

#[derive(Debug)]
pub enum Event {
    /// Sent once by the shell before anything else.
    Configured(Box<ClientConfig>),

    // User intents
    ModeSelected {
        mode: Mode,
    },
    /// A drop or browse produced a candidate. `None` is a drop with no payload.
    FileProvided(Option<Box<UploadedFile>>),
    ClearRequested,
    DetectRequested,
    HealthCheckRequested,
    ErrorDismissed,

    // Capability responses (boxed to keep enum size small)
    ImageDecoded {
        preview: PreviewId,
        result: Box<DecodeOutput>,
    },
    DetectionResponse {
        ticket: SubmissionTicket,
        result: Box<HttpResult>,
    },
    HealthCheckResponse(Box<HttpResult>),
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Configured(_) => "configured",
            Self::ModeSelected { .. } => "mode_selected",
            Self::FileProvided(_) => "file_provided",
            Self::ClearRequested => "clear_requested",
            Self::DetectRequested => "detect_requested",
            Self::HealthCheckRequested => "health_check_requested",
            Self::ErrorDismissed => "error_dismissed",
            Self::ImageDecoded { .. } => "image_decoded",
            Self::DetectionResponse { .. } => "detection_response",
            Self::HealthCheckResponse(_) => "health_check_response",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::ModeSelected { .. }
                | Self::FileProvided(_)
                | Self::ClearRequested
                | Self::DetectRequested
                | Self::HealthCheckRequested
                | Self::ErrorDismissed
        )
    }

    pub fn file(name: impl Into<String>, media_type: Option<&str>, bytes: impl Into<bytes::Bytes>) -> Self {
        Self::FileProvided(Some(Box::new(UploadedFile::new(name, media_type, bytes))))
    }
}
