// lib.rs - Helmet detection client core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod event;
pub mod image_processing;
pub mod ingest;
pub mod model;
pub mod multipart;
pub mod normalize;
pub mod overlay;
pub mod shell;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use config::{ClientConfig, StaleResponsePolicy};
pub use event::Event;
pub use model::{Mode, Model, UploadedFile, ViewModel};
pub use normalize::{normalize, NormalizedResult};

pub const VERDICT_WORN: &str = "HELMET WORN";
pub const VERDICT_NOT_WORN: &str = "NOT WORN";
pub const DEFAULT_API_ORIGIN: &str = "http://127.0.0.1:8000";
pub const DEFAULT_UPLOAD_FIELD: &str = "file";
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 8192;
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UserInput,
    UnsupportedMedia,
    FileTooLarge,
    Decode,
    Network,
    Protocol,
    Parse,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UserInput => "USER_INPUT_ERROR",
            Self::UnsupportedMedia => "UNSUPPORTED_MEDIA",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::Decode => "DECODE_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Protocol => "PROTOCOL_ERROR",
            Self::Parse => "PARSE_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::UserInput | ErrorKind::UnsupportedMedia => self.message.clone(),
            ErrorKind::FileTooLarge => format!(
                "The file is too large. Please use a file smaller than {} MB.",
                self.context
                    .get("max_bytes")
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(MAX_UPLOAD_BYTES)
                    / (1024 * 1024)
            ),
            ErrorKind::Decode => {
                "Unable to read the image. Please try a different picture.".into()
            }
            ErrorKind::Network => {
                "Backend not running. Please check that the detection service is reachable."
                    .into()
            }
            ErrorKind::Protocol => match self.context.get("http_status") {
                Some(status) => format!("Backend error (HTTP {status})."),
                None => format!("Backend error: {}", self.message),
            },
            ErrorKind::Parse => "The backend returned a response that could not be read.".into(),
            ErrorKind::Internal => "An unexpected error occurred. Please try again.".into(),
        }
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .and_then(ApiErrorResponse::into_message)
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        Self::new(ErrorKind::Protocol, message).with_context("http_status", status.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

/// Error body shapes the backend is known to produce: FastAPI's `detail` and
/// the handlers' own `error` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl ApiErrorResponse {
    fn into_message(self) -> Option<String> {
        if let Some(error) = self.error {
            return Some(error);
        }
        match self.detail? {
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}

impl From<crux_http::Error> for AppError {
    fn from(e: crux_http::Error) -> Self {
        match &e {
            // Non-2xx statuses arrive here with the body attached.
            crux_http::Error::Http(status) => {
                Self::from_http_status(u16::from(status.code), status.body.as_deref())
            }
            crux_http::Error::Io(_) | crux_http::Error::Timeout => {
                AppError::new(ErrorKind::Network, "Transport failure").with_internal(e.to_string())
            }
            crux_http::Error::Json(reason) => AppError::new(ErrorKind::Parse, reason.clone()),
            crux_http::Error::Url(_) => {
                AppError::new(ErrorKind::Internal, "Request could not be built")
                    .with_internal(e.to_string())
            }
        }
    }
}

impl From<image_processing::DecodeError> for AppError {
    fn from(e: image_processing::DecodeError) -> Self {
        AppError::new(ErrorKind::Decode, e.to_string())
    }
}

impl From<ingest::IngestError> for AppError {
    fn from(e: ingest::IngestError) -> Self {
        use ingest::IngestError;
        match &e {
            IngestError::Empty { .. } => AppError::new(ErrorKind::UserInput, e.to_string()),
            IngestError::TooLarge { max, .. } => AppError::new(ErrorKind::FileTooLarge, e.to_string())
                .with_context("max_bytes", max.to_string()),
            IngestError::WrongMedia { .. } | IngestError::UnsupportedVideo { .. } => {
                AppError::new(ErrorKind::UnsupportedMedia, e.to_string())
            }
        }
    }
}

impl From<normalize::ParseError> for AppError {
    fn from(e: normalize::ParseError) -> Self {
        match e {
            normalize::ParseError::BackendRejected { message } => {
                AppError::new(ErrorKind::Protocol, message)
            }
            other => AppError::new(ErrorKind::Parse, other.to_string()),
        }
    }
}

/// Formats a number the way the browser's `Number.prototype.toFixed` does:
/// nearest by exact binary value, exact ties away from zero.
#[must_use]
pub fn to_fixed(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    // `{:.N}` breaks exact ties to even; one ulp outward settles them away from zero.
    let value = if is_exact_tie(value, digits) {
        f64::from_bits(value.to_bits() + 1)
    } else {
        value
    };
    format!("{value:.digits$}")
}

/// True when `value` ends exactly on a 5 in decimal place `digits + 1`.
/// A finite double is `m * 2^e`; with `m` odd and `e < 0` its decimal
/// expansion has exactly `-e` fractional digits, the last of them a 5.
fn is_exact_tie(value: f64, digits: usize) -> bool {
    let bits = value.to_bits();
    let biased = i64::try_from((bits >> 52) & 0x7ff).unwrap_or_default();
    let mut mantissa = bits & ((1 << 52) - 1);
    let mut exponent = if biased == 0 {
        -1074
    } else {
        mantissa |= 1 << 52;
        biased - 1075
    };
    if mantissa == 0 {
        return false;
    }
    let shift = mantissa.trailing_zeros();
    mantissa >>= shift;
    exponent += i64::from(shift);
    exponent < 0 && usize::try_from(-exponent).is_ok_and(|places| places == digits + 1)
}
