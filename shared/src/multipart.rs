//! `multipart/form-data` bodies, laid out the way browsers encode `FormData`.

use bytes::{BufMut, Bytes, BytesMut};

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    body: BytesMut,
}

impl MultipartForm {
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(format!("----helmet-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: BytesMut::new(),
        }
    }

    #[must_use]
    pub fn file(mut self, field: &str, filename: &str, media_type: &str, data: &[u8]) -> Self {
        let media_type = if media_type.is_empty() {
            OCTET_STREAM
        } else {
            media_type
        };
        self.body.reserve(data.len() + 256);
        self.body.put_slice(b"--");
        self.body.put_slice(self.boundary.as_bytes());
        self.body.put_slice(b"\r\n");
        self.body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                escape_quoted(field),
                escape_quoted(filename)
            )
            .as_bytes(),
        );
        self.body
            .put_slice(format!("Content-Type: {media_type}\r\n\r\n").as_bytes());
        self.body.put_slice(data);
        self.body.put_slice(b"\r\n");
        self
    }

    #[must_use]
    pub fn content_type(&self) -> String {
        format!("{MULTIPART_FORM_DATA}; boundary={}", self.boundary)
    }

    #[must_use]
    pub fn into_body(mut self) -> Bytes {
        self.body.put_slice(b"--");
        self.body.put_slice(self.boundary.as_bytes());
        self.body.put_slice(b"--\r\n");
        self.body.freeze()
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

// Same escaping as the HTML spec's form-data encoder.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
