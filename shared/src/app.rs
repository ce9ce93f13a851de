use tracing::{debug, error, info, warn};

use crate::capabilities::{Capabilities, DecodeOutput, HttpResult};
use crate::client;
use crate::config::StaleResponsePolicy;
use crate::event::Event;
use crate::ingest;
use crate::model::{
    Model, PreviewHandle, PreviewId, PreviewView, ResultView, SubmissionTicket, UploadedFile,
    UserFacingError, ViewModel,
};
use crate::normalize::{normalize, RawResponse};
use crate::overlay::{self, Surface};
use crate::{AppError, ErrorKind};

pub const DETECT_LABEL_IDLE: &str = "Run Detection";
pub const DETECT_LABEL_BUSY: &str = "Detecting...";
pub const NO_FILE_MESSAGE: &str = "Upload a file first";

#[derive(Default)]
pub struct App;

impl App {
    fn release_preview(released: Option<PreviewId>, caps: &Capabilities) {
        if let Some(id) = released {
            caps.preview.release(id);
        }
    }

    fn reset_session(model: &mut Model, caps: &Capabilities) {
        Self::release_preview(model.reset(), caps);
    }

    fn ingest_file(file: UploadedFile, model: &mut Model, caps: &Capabilities) {
        let handle = match ingest::prepare(&file, model.mode, model.config.max_upload_bytes) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(name = %file.name, error = %e, "file rejected");
                model.set_error(e.into());
                return;
            }
        };

        Self::release_preview(model.retire_file(), caps);
        model.clear_error();

        if let PreviewHandle::Image { id } = &handle {
            caps.preview.acquire(id.clone(), file.bytes.clone());
            let preview = id.clone();
            caps.decode
                .decode(id.clone(), file.bytes.clone(), move |result| Event::ImageDecoded {
                    preview,
                    result: Box::new(result),
                });
        }

        model.preview = Some(handle);
        model.file = Some(file);
    }

    fn on_image_decoded(preview: &PreviewId, result: DecodeOutput, model: &mut Model) {
        let current = model.preview.as_ref().and_then(PreviewHandle::image_id);
        if current != Some(preview) {
            debug!(%preview, "decode finished for a replaced preview");
            return;
        }

        match result {
            Ok(image) => {
                overlay::paint_baseline(&mut model.surface, &image);
                if !model.detections.is_empty() {
                    overlay::render(&mut model.surface, &image, &model.detections);
                }
                debug!(
                    width = image.width(),
                    height = image.height(),
                    pending = model.detections.len(),
                    "baseline painted"
                );
                model.base_image = Some(image);
            }
            Err(e) => {
                warn!(%preview, error = %e, "image decode failed");
                model.base_image = None;
                model.surface.resize(0, 0);
                model.set_error(e.into());
            }
        }
    }

    fn submit(model: &mut Model, caps: &Capabilities) {
        let Some(file) = &model.file else {
            warn!("detection requested without a file");
            model.set_error(AppError::new(ErrorKind::UserInput, NO_FILE_MESSAGE));
            return;
        };

        let bytes = file.size();
        let request = match client::detection_request(&caps.http, &model.config, file, model.mode) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "failed to build detection request");
                model.set_error(e);
                return;
            }
        };

        let ticket = model.next_ticket();
        model.in_flight += 1;
        info!(
            generation = ticket.generation,
            mode = %ticket.mode,
            bytes,
            "detection submitted"
        );

        request.send(move |result| Event::DetectionResponse {
            ticket,
            result: Box::new(result),
        });
    }

    fn accepts(model: &Model, ticket: SubmissionTicket) -> bool {
        if ticket.mode != model.mode {
            return false;
        }
        match model.config.stale_response_policy {
            StaleResponsePolicy::DiscardStale => ticket.generation == model.generation,
            StaleResponsePolicy::ApplyLatestArrival => true,
        }
    }

    fn on_detection_response(ticket: SubmissionTicket, result: HttpResult, model: &mut Model) {
        model.in_flight = model.in_flight.saturating_sub(1);

        if !Self::accepts(model, ticket) {
            warn!(
                generation = ticket.generation,
                current = model.generation,
                mode = %ticket.mode,
                "stale detection response discarded"
            );
            return;
        }

        let raw = match client::interpret_detection(ticket.mode, result) {
            Ok(raw) => raw,
            Err(e) => {
                error!(code = e.code(), error = %e, "detection failed");
                model.set_error(e);
                return;
            }
        };

        let normalized = normalize(&raw);
        match raw {
            RawResponse::Image(response) => {
                model.detections = response.detections;
                model.video_stats = None;
                match &model.base_image {
                    Some(base) => overlay::render(&mut model.surface, base, &model.detections),
                    None => debug!("overlay waits for decode"),
                }
            }
            RawResponse::Video(response) => {
                model.video_stats = response.stats();
                model.detections.clear();
            }
        }

        info!(
            generation = ticket.generation,
            verdict = normalized.verdict(),
            avg_confidence = %normalized.avg_confidence_text(),
            "detection result applied"
        );
        model.result = Some(normalized);
        model.clear_error();
    }

    fn request_health(model: &mut Model, caps: &Capabilities) {
        match client::health_request(&caps.http, &model.config) {
            Ok(request) => request.send(|result| Event::HealthCheckResponse(Box::new(result))),
            Err(e) => {
                warn!(error = %e, "failed to build health request");
                model.backend_status = Some(crate::model::BackendStatus::Offline(e.to_string()));
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        let event_name = event.name();
        if event.is_user_initiated() {
            debug!(event = event_name, "user action");
        }

        match event {
            Event::Configured(config) => {
                info!(origin = config.origin(), "client configured");
                model.config = *config;
                caps.render.render();
            }

            Event::ModeSelected { mode } => {
                model.mode = mode;
                Self::reset_session(model, caps);
                caps.render.render();
            }

            Event::ClearRequested => {
                Self::reset_session(model, caps);
                caps.render.render();
            }

            Event::FileProvided(None) => {
                debug!("drop without a file ignored");
            }

            Event::FileProvided(Some(file)) => {
                Self::ingest_file(*file, model, caps);
                caps.render.render();
            }

            Event::DetectRequested => {
                Self::submit(model, caps);
                caps.render.render();
            }

            Event::ImageDecoded { preview, result } => {
                Self::on_image_decoded(&preview, *result, model);
                caps.render.render();
            }

            Event::DetectionResponse { ticket, result } => {
                Self::on_detection_response(ticket, *result, model);
                caps.render.render();
            }

            Event::HealthCheckRequested => {
                Self::request_health(model, caps);
                caps.render.render();
            }

            Event::HealthCheckResponse(result) => {
                let status = client::interpret_health(*result);
                debug!(online = status.is_online(), "backend status updated");
                model.backend_status = Some(status);
                caps.render.render();
            }

            Event::ErrorDismissed => {
                model.clear_error();
                caps.render.render();
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        let result = model.result.as_ref().map(|result| ResultView {
            video_src: result.video_url().map(|url| model.config.media_url(url)),
            stream_src: result.video_url().and_then(|url| model.config.stream_url(url)),
            result: result.clone(),
        });

        let preview = model.preview.as_ref().map(|p| match p {
            PreviewHandle::Image { id } => PreviewView::Image { id: id.to_string() },
            PreviewHandle::Video { name } => PreviewView::Video { name: name.clone() },
        });

        ViewModel {
            mode: model.mode,
            file_name: model.file.as_ref().map(|f| f.name.clone()),
            preview,
            drop_prompt: format!("Drag & Drop {}", model.mode.label()),
            accept: model.mode.accept().to_string(),
            is_busy: model.is_busy(),
            detect_label: if model.is_busy() {
                DETECT_LABEL_BUSY
            } else {
                DETECT_LABEL_IDLE
            }
            .to_string(),
            result,
            video_stats: model.video_stats.clone(),
            surface_width: model.surface.width(),
            surface_height: model.surface.height(),
            overlay: model.surface.ops().to_vec(),
            error: model.active_error.as_ref().map(UserFacingError::from),
            backend_status: model.backend_status.clone(),
        }
    }
}
