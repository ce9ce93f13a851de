use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};
use helmet_shared::model::{BackendStatus, PreviewView};
use helmet_shared::shell::{Shell, Transport};
use helmet_shared::{ClientConfig, Event, Mode};
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};

/// Answers requests from a queue and keeps what it was sent.
#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<HttpResult>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl Scripted {
    fn replying(replies: impl IntoIterator<Item = HttpResult>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::default(),
        }
    }

    fn seen(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        self.seen.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| HttpResult::Err(crux_http::Error::Io("no reply scripted".into())))
    }
}

fn json(status: u16, body: &str) -> HttpResult {
    HttpResult::Ok(
        HttpResponse::status(status)
            .header("content-type", "application/json")
            .body(body)
            .build(),
    )
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
    let mut buffer = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buffer)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        .unwrap();
    buffer
}

#[tokio::test]
async fn image_submission_through_the_shell() {
    let transport = Scripted::replying([json(
        200,
        r#"{"helmets_detected":2,"detections":[
            {"x1":50,"y1":60,"x2":200,"y2":220,"confidence":0.92},
            {"x1":300,"y1":80,"x2":420,"y2":240,"confidence":0.77}
        ]}"#,
    )]);
    let mut shell = Shell::new(ClientConfig::default(), transport);
    let mut views = shell.subscribe();

    // 1. Drop the image; decode runs in the background.
    shell.dispatch(Event::file("rider.png", Some("image/png"), png(640, 480)));
    let view = views.borrow_and_update().clone();
    assert_eq!(view.file_name.as_deref(), Some("rider.png"));
    assert!(matches!(view.preview, Some(PreviewView::Image { .. })));
    shell.settle().await;
    assert_eq!((shell.view().surface_width, shell.view().surface_height), (640, 480));

    // 2. Submit and wait for the response.
    shell.dispatch(Event::DetectRequested);
    assert!(views.borrow_and_update().is_busy);
    assert_eq!(views.borrow().detect_label, "Detecting...");
    shell.settle().await;

    // 3. The backend saw one multipart POST.
    let seen = shell.transport().seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].url, "http://127.0.0.1:8000/predict");
    let body = String::from_utf8_lossy(&seen[0].body).into_owned();
    assert!(body.contains("name=\"file\"; filename=\"rider.png\""));

    // 4. The published view carries the result and the overlay is painted.
    let view = views.borrow_and_update().clone();
    assert!(!view.is_busy);
    assert_eq!(view.detect_label, "Run Detection");
    let result = view.result.as_ref().expect("result");
    assert_eq!(result.result.verdict(), "HELMET WORN");
    assert_eq!(result.result.avg_confidence_text(), "0.845");
    assert_eq!(view.box_count(), 2);
    assert_eq!(view.labels(), ["Helmet 92.0%", "Helmet 77.0%"]);
}

#[tokio::test]
async fn video_submission_through_the_shell() {
    let transport = Scripted::replying([json(
        200,
        r#"{"verdict":"NOT WORN","avg_confidence":0.12,"helmet_presence_ratio":0.3,"video_url":"/clips/out1.mp4"}"#,
    )]);
    let mut shell = Shell::new(ClientConfig::default(), transport);

    shell.dispatch(Event::ModeSelected { mode: Mode::Video });
    shell.dispatch(Event::file("ride.mp4", Some("video/mp4"), vec![0; 64]));
    assert_eq!(shell.live_previews(), 0);
    assert_eq!(shell.pending(), 0);

    shell.dispatch(Event::DetectRequested);
    shell.settle().await;

    let seen = shell.transport().seen();
    assert_eq!(seen[0].url, "http://127.0.0.1:8000/predict-video");

    let result = shell.view().result.expect("result");
    assert_eq!(result.result.verdict(), "NOT WORN");
    assert_eq!(
        result.video_src.as_deref(),
        Some("http://127.0.0.1:8000/clips/out1.mp4")
    );
}

#[tokio::test]
async fn replaced_previews_are_released() {
    let mut shell = Shell::new(ClientConfig::default(), Scripted::default());

    for name in ["a.png", "b.png", "c.png"] {
        shell.dispatch(Event::file(name, Some("image/png"), png(8, 8)));
    }
    assert_eq!(shell.live_previews(), 1);

    let id = match shell.view().preview {
        Some(PreviewView::Image { id }) => id,
        other => panic!("unexpected preview {other:?}"),
    };
    shell.settle().await;
    let view = shell.view();
    assert_eq!(view.preview, Some(PreviewView::Image { id }));
    assert_eq!((view.surface_width, view.surface_height), (8, 8));
    assert_eq!(shell.live_previews(), 1);

    shell.dispatch(Event::ModeSelected { mode: Mode::Video });
    assert_eq!(shell.live_previews(), 0);
}

#[tokio::test]
async fn undecodable_image_reports_decode_error() {
    let mut shell = Shell::new(ClientConfig::default(), Scripted::default());
    shell.dispatch(Event::file("broken.png", Some("image/png"), b"not a png".to_vec()));
    shell.settle().await;

    let view = shell.view();
    assert_eq!(view.error.expect("error").code, "DECODE_ERROR");
    assert_eq!((view.surface_width, view.surface_height), (0, 0));
    assert_eq!(view.file_name.as_deref(), Some("broken.png"));
}

#[tokio::test]
async fn unreachable_backend_reports_network_error() {
    let transport = Scripted::replying([HttpResult::Err(crux_http::Error::Io(
        "connection refused".into(),
    ))]);
    let mut shell = Shell::new(ClientConfig::default(), transport);
    shell.dispatch(Event::file("rider.png", Some("image/png"), png(4, 4)));
    shell.dispatch(Event::DetectRequested);
    shell.settle().await;

    let view = shell.view();
    assert!(!view.is_busy);
    assert!(view.result.is_none());
    let error = view.error.expect("error");
    assert_eq!(error.code, "NETWORK_ERROR");
    assert!(error.message.starts_with("Backend not running"));

    shell.dispatch(Event::ErrorDismissed);
    assert!(shell.view().error.is_none());
}

#[tokio::test]
async fn health_check_updates_backend_status() {
    let transport = Scripted::replying([json(200, r#"{"status":"API running"}"#)]);
    let mut shell = Shell::new(ClientConfig::default(), transport);
    shell.dispatch(Event::HealthCheckRequested);
    shell.settle().await;

    assert_eq!(
        shell.view().backend_status,
        Some(BackendStatus::Online("API running".into()))
    );
    assert_eq!(shell.transport().seen()[0].method, "GET");
}

#[tokio::test]
async fn overlapping_submissions_show_only_the_latest() {
    let transport = Scripted::replying([
        json(200, r#"{"detections":[{"x1":0,"y1":0,"x2":2,"y2":2,"confidence":0.4}]}"#),
        json(200, r#"{"detections":[]}"#),
    ]);
    let mut shell = Shell::new(ClientConfig::default(), transport);
    shell.dispatch(Event::file("rider.png", Some("image/png"), png(16, 16)));
    shell.settle().await;

    shell.dispatch(Event::DetectRequested);
    shell.dispatch(Event::DetectRequested);
    shell.settle().await;

    // Either reply may belong to the second submission; whichever does is the
    // one shown, and the overlay agrees with it.
    let view = shell.view();
    assert!(!view.is_busy);
    assert_eq!(shell.transport().seen().len(), 2);
    let expected_rects = match view.result.as_ref().expect("result").result.verdict() {
        "HELMET WORN" => 1,
        _ => 0,
    };
    assert_eq!(view.box_count(), expected_rects);
}
