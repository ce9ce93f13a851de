use thiserror::Error;
use tracing::debug;

use crate::multipart::OCTET_STREAM;
use crate::model::{Mode, PreviewHandle, PreviewId, UploadedFile};
use crate::VIDEO_EXTENSIONS;

/// Extensions accepted for images when the picker gives no media type.
/// Matches the codecs the decoder is built with.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("{name} is empty")]
    Empty { name: String },

    #[error("{name} is {size} bytes, over the {max} byte limit")]
    TooLarge { name: String, size: usize, max: usize },

    #[error("{name} is not a supported {expected} file")]
    WrongMedia { name: String, expected: Mode },

    #[error("{name}: only .mp4, .avi and .mov videos are supported")]
    UnsupportedVideo { name: String },
}

/// Checks a candidate against the active mode.
pub fn validate(file: &UploadedFile, mode: Mode, max_bytes: usize) -> Result<(), IngestError> {
    if file.bytes.is_empty() {
        return Err(IngestError::Empty {
            name: file.name.clone(),
        });
    }
    if file.size() > max_bytes {
        return Err(IngestError::TooLarge {
            name: file.name.clone(),
            size: file.size(),
            max: max_bytes,
        });
    }

    let extension = file.extension();
    let declared = file.media_type.as_deref();

    match mode {
        Mode::Image => {
            let accepted = match declared {
                Some(media_type) => media_type.starts_with("image/"),
                None => extension
                    .as_deref()
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext)),
            };
            if !accepted {
                return Err(IngestError::WrongMedia {
                    name: file.name.clone(),
                    expected: mode,
                });
            }
        }
        Mode::Video => {
            if let Some(media_type) = declared {
                if !media_type.starts_with("video/") && media_type != OCTET_STREAM {
                    return Err(IngestError::WrongMedia {
                        name: file.name.clone(),
                        expected: mode,
                    });
                }
            }
            // The backend decides by extension alone.
            if !extension
                .as_deref()
                .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext))
            {
                return Err(IngestError::UnsupportedVideo {
                    name: file.name.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Validates the candidate and allocates its preview handle: a fresh
/// transient reference for images, the file name for videos.
pub fn prepare(file: &UploadedFile, mode: Mode, max_bytes: usize) -> Result<PreviewHandle, IngestError> {
    validate(file, mode, max_bytes)?;

    let handle = match mode {
        Mode::Image => PreviewHandle::Image {
            id: PreviewId::new(),
        },
        Mode::Video => PreviewHandle::Video {
            name: file.name.clone(),
        },
    };
    debug!(name = %file.name, size = file.size(), %mode, "file accepted");
    Ok(handle)
}

/// Media type sent with the upload.
#[must_use]
pub fn upload_media_type(file: &UploadedFile) -> String {
    if let Some(media_type) = &file.media_type {
        return media_type.clone();
    }
    let guessed = match file.extension().as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        _ => OCTET_STREAM,
    };
    guessed.to_string()
}
