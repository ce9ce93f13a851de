//! Detection round trip: request construction and response interpretation.
//! The exchange itself is performed by the shell.

use crux_http::http::{Method, Url};
use crux_http::{Http, RequestBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::capabilities::HttpResult;
use crate::config::ClientConfig;
use crate::ingest::upload_media_type;
use crate::model::{BackendStatus, Mode, UploadedFile};
use crate::multipart::MultipartForm;
use crate::normalize::RawResponse;
use crate::{AppError, ErrorKind};

/// POST of the file, as the single multipart field, to the endpoint for `mode`.
pub fn detection_request<Ev>(
    http: &Http<Ev>,
    config: &ClientConfig,
    file: &UploadedFile,
    mode: Mode,
) -> Result<RequestBuilder<Ev>, AppError>
where
    Ev: 'static,
{
    let url = parse_url(&config.endpoint(mode))?;
    let form = MultipartForm::new().file(
        &config.upload_field,
        &file.name,
        &upload_media_type(file),
        &file.bytes,
    );
    let content_type = form.content_type();

    Ok(http
        .request(Method::Post, url)
        .header("Accept", "application/json")
        .body_bytes(form.into_body())
        .header("Content-Type", content_type))
}

pub fn health_request<Ev>(http: &Http<Ev>, config: &ClientConfig) -> Result<RequestBuilder<Ev>, AppError>
where
    Ev: 'static,
{
    let url = parse_url(&config.health_url())?;
    Ok(http.request(Method::Get, url))
}

fn parse_url(raw: &str) -> Result<Url, AppError> {
    Url::parse(raw).map_err(|e| {
        AppError::new(ErrorKind::Internal, "Request could not be built")
            .with_internal(e.to_string())
            .with_context("url", raw)
    })
}

/// Sorts a finished exchange into a parsed body or one of the submission
/// failures: transport problems are network errors, non-2xx statuses are
/// protocol errors, unreadable bodies are parse errors.
pub fn interpret_detection(mode: Mode, result: HttpResult) -> Result<RawResponse, AppError> {
    let mut response = result.map_err(AppError::from)?;
    let body = response.body_bytes().unwrap_or_default();

    debug!(
        status = u16::from(response.status()),
        bytes = body.len(),
        "detection response received"
    );
    RawResponse::parse(mode, &body).map_err(AppError::from)
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

#[must_use]
pub fn interpret_health(result: HttpResult) -> BackendStatus {
    match result {
        Ok(mut response) => match response.body_json::<HealthBody>() {
            Ok(body) => BackendStatus::Online(body.status),
            Err(e) => BackendStatus::Offline(e.to_string()),
        },
        Err(crux_http::Error::Http(e)) => BackendStatus::Offline(format!("HTTP {}", u16::from(e.code))),
        Err(e) => BackendStatus::Offline(e.to_string()),
    }
}
