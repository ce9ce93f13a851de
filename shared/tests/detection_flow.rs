use crux_core::testing::AppTester;
use crux_core::Request;
use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};
use helmet_shared::capabilities::PreviewOperation;
use helmet_shared::image_processing::DecodedImage;
use helmet_shared::model::PreviewId;
use helmet_shared::overlay::{DrawOp, Surface};
use helmet_shared::{
    App, ClientConfig, Effect, ErrorKind, Event, Mode, Model, NormalizedResult, StaleResponsePolicy,
};
use image::{Rgba, RgbaImage};

struct Harness {
    app: AppTester<App, Effect>,
    model: Model,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    fn with_config(config: ClientConfig) -> Self {
        Self {
            app: AppTester::default(),
            model: Model::new(config),
        }
    }

    fn update(&mut self, event: Event) -> Vec<Effect> {
        self.app.update(event, &mut self.model).effects
    }

    /// Feeds events emitted by a resolved effect back into the app.
    fn apply(&mut self, events: Vec<Event>) -> Vec<Effect> {
        let mut effects = Vec::new();
        for event in events {
            effects.extend(self.update(event));
        }
        effects
    }

    /// Loads an image and completes its decode with a solid raster.
    fn load_image(&mut self, width: u32, height: u32) -> PreviewId {
        let mut decode = self
            .update(Event::file("photo.png", Some("image/png"), vec![1, 2, 3]))
            .into_iter()
            .find_map(Effect::into_decode)
            .expect("decode request");
        let id = decode.operation.preview.clone();
        let raster = RgbaImage::from_pixel(width, height, Rgba([40, 40, 40, 255]));
        let update = self
            .app
            .resolve(&mut decode, Ok(DecodedImage::new(raster)))
            .expect("decode resolves");
        self.apply(update.events);
        id
    }

    fn load_video(&mut self) {
        self.update(Event::ModeSelected { mode: Mode::Video });
        self.update(Event::file("ride.mp4", Some("video/mp4"), vec![0; 32]));
    }

    fn submit(&mut self) -> Request<HttpRequest> {
        let mut http: Vec<_> = self
            .update(Event::DetectRequested)
            .into_iter()
            .filter_map(Effect::into_http)
            .collect();
        assert_eq!(http.len(), 1, "one request per submission");
        http.remove(0)
    }

    fn respond(&mut self, mut request: Request<HttpRequest>, result: HttpResult) -> Vec<Effect> {
        let update = self
            .app
            .resolve(&mut request, result)
            .expect("request resolves");
        self.apply(update.events)
    }
}

fn reply(status: u16, body: &str) -> HttpResult {
    HttpResult::Ok(HttpResponse::status(status).body(body).build())
}

const TWO_HELMETS: &str = r#"{
    "helmets_detected": 2,
    "detections": [
        {"x1": 50, "y1": 60, "x2": 200, "y2": 220, "confidence": 0.92},
        {"x1": 300, "y1": 80, "x2": 420, "y2": 240, "confidence": 0.77}
    ]
}"#;

const VIDEO_RESULT: &str = r#"{
    "verdict": "NOT WORN",
    "avg_confidence": 0.12,
    "helmet_presence_ratio": 0.3,
    "video_url": "/clips/out1.mp4"
}"#;

#[test]
fn image_detection_end_to_end() {
    let mut h = Harness::new();
    h.load_image(640, 480);
    assert_eq!((h.model.surface.width(), h.model.surface.height()), (640, 480));

    let request = h.submit();
    assert_eq!(request.operation.url, "http://127.0.0.1:8000/predict");

    let effects = h.respond(request, reply(200, TWO_HELMETS));
    assert!(effects.iter().any(Effect::is_render));

    assert_eq!((h.model.surface.width(), h.model.surface.height()), (640, 480));
    assert_eq!(h.model.surface.rect_count(), 2);
    assert_eq!(h.model.surface.labels(), ["Helmet 92.0%", "Helmet 77.0%"]);

    let view = h.app.view(&h.model);
    let result = view.result.expect("result");
    assert_eq!(
        result.result,
        NormalizedResult::Image {
            verdict: "HELMET WORN".into(),
            avg_confidence: "0.845".into(),
        }
    );
    assert_eq!(result.video_src, None);
    assert!(!view.is_busy);
}

#[test]
fn video_detection_end_to_end() {
    let mut h = Harness::new();
    h.load_video();
    assert_eq!(
        h.app.view(&h.model).preview,
        Some(helmet_shared::model::PreviewView::Video {
            name: "ride.mp4".into()
        })
    );

    let request = h.submit();
    assert_eq!(request.operation.url, "http://127.0.0.1:8000/predict-video");

    h.respond(request, reply(200, VIDEO_RESULT));

    let view = h.app.view(&h.model);
    let result = view.result.expect("result");
    assert_eq!(
        result.result,
        NormalizedResult::Video {
            verdict: "NOT WORN".into(),
            avg_confidence: 0.12,
            helmet_presence_ratio: 0.3,
            video_url: "/clips/out1.mp4".into(),
        }
    );
    assert_eq!(
        result.video_src.as_deref(),
        Some("http://127.0.0.1:8000/clips/out1.mp4")
    );
    assert_eq!(
        result.stream_src.as_deref(),
        Some("http://127.0.0.1:8000/stream-video?filename=out1.mp4")
    );
    assert_eq!((view.surface_width, view.surface_height), (0, 0));
}

#[test]
fn mode_switch_resets_everything() {
    for target in [Mode::Image, Mode::Video] {
        let mut h = Harness::new();
        let preview = h.load_image(64, 48);
        let request = h.submit();
        h.respond(request, reply(200, TWO_HELMETS));
        assert!(h.model.result.is_some());

        let effects = h.update(Event::ModeSelected { mode: target });

        assert_eq!(h.model.mode, target);
        assert!(h.model.file.is_none());
        assert!(h.model.preview.is_none());
        assert!(h.model.result.is_none());
        assert!(h.model.surface.is_blank());
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Preview(request)
                if request.operation == PreviewOperation::Release { id: preview.clone() }
        )));
    }
}

#[test]
fn mode_switch_without_content_is_harmless() {
    let mut h = Harness::new();
    let effects = h.update(Event::ModeSelected { mode: Mode::Video });
    assert!(h.model.surface.is_blank());
    let names: Vec<_> = effects.iter().map(Effect::name).collect();
    assert_eq!(names, ["render"]);
}

#[test]
fn clear_keeps_mode() {
    let mut h = Harness::new();
    h.load_video();
    h.update(Event::ClearRequested);
    assert_eq!(h.model.mode, Mode::Video);
    assert!(h.model.file.is_none());
    assert!(h.app.view(&h.model).file_name.is_none());
}

#[test]
fn submit_without_file_makes_no_request() {
    let mut h = Harness::new();
    let effects = h.update(Event::DetectRequested);
    assert!(!effects.iter().any(Effect::is_http));

    let error = h.model.active_error.as_ref().expect("error");
    assert_eq!(error.kind, ErrorKind::UserInput);
    assert_eq!(error.message, "Upload a file first");
    assert!(!h.model.is_busy());
}

#[test]
fn failed_submission_leaves_previous_result() {
    for (load_video, status) in [(false, 500), (true, 404), (false, 422)] {
        let mut h = Harness::new();
        if load_video {
            h.load_video();
        } else {
            h.load_image(640, 480);
        }
        let body = if load_video { VIDEO_RESULT } else { TWO_HELMETS };
        let request = h.submit();
        h.respond(request, reply(200, body));
        let before = h.model.result.clone().expect("first result");
        let painted = h.model.surface.ops().to_vec();

        let request = h.submit();
        h.respond(request, reply(status, r#"{"detail":"boom"}"#));

        assert_eq!(h.model.result.as_ref(), Some(&before));
        assert_eq!(h.model.surface.ops(), painted.as_slice());
        assert_eq!(h.model.active_error.as_ref().unwrap().kind, ErrorKind::Protocol);
        assert!(!h.model.is_busy());
    }
}

#[test]
fn unreadable_body_is_a_parse_error() {
    let mut h = Harness::new();
    h.load_image(10, 10);
    let request = h.submit();
    h.respond(request, reply(200, "<html>502 Bad Gateway</html>"));
    assert_eq!(h.model.active_error.as_ref().unwrap().kind, ErrorKind::Parse);
    assert!(h.model.result.is_none());
}

#[test]
fn overlay_follows_detection_order() {
    let mut h = Harness::new();
    h.load_image(300, 300);
    let request = h.submit();
    h.respond(
        request,
        reply(
            200,
            r#"{"detections":[
                {"x1":10,"y1":10,"x2":100,"y2":100,"confidence":0.31},
                {"x1":10,"y1":10,"x2":100,"y2":100,"confidence":0.99},
                {"x1":150,"y1":150,"x2":250,"y2":250,"confidence":0.5}
            ]}"#,
        ),
    );

    let rects: Vec<_> = h
        .model
        .surface
        .ops()
        .iter()
        .filter_map(|op| match op {
            DrawOp::StrokeRect { x, y, .. } => Some((*x, *y)),
            _ => None,
        })
        .collect();
    assert_eq!(rects, [(10.0, 10.0), (10.0, 10.0), (150.0, 150.0)]);
    assert_eq!(
        h.model.surface.labels(),
        ["Helmet 31.0%", "Helmet 99.0%", "Helmet 50.0%"]
    );
}

#[test]
fn empty_detections_repaint_clean_base() {
    let mut h = Harness::new();
    h.load_image(100, 100);
    let request = h.submit();
    h.respond(request, reply(200, TWO_HELMETS));
    let request = h.submit();
    h.respond(request, reply(200, r#"{"detections":[]}"#));

    assert_eq!(h.model.surface.rect_count(), 0);
    assert_eq!(
        h.model.result,
        Some(NormalizedResult::Image {
            verdict: "NOT WORN".into(),
            avg_confidence: "0.000".into(),
        })
    );
}

#[test]
fn response_after_mode_switch_is_discarded() {
    let mut h = Harness::new();
    h.load_image(50, 50);
    let request = h.submit();
    h.update(Event::ModeSelected { mode: Mode::Video });

    h.respond(request, reply(200, TWO_HELMETS));
    assert!(h.model.result.is_none());
    assert!(h.model.surface.is_blank());
    assert!(!h.model.is_busy());
}

#[test]
fn response_after_clear_is_discarded_by_default() {
    let mut h = Harness::new();
    h.load_video();
    let request = h.submit();
    h.update(Event::ClearRequested);
    h.respond(request, reply(200, VIDEO_RESULT));
    assert!(h.model.result.is_none());
}

#[test]
fn latest_arrival_policy_reproduces_unguarded_behavior() {
    let mut h = Harness::with_config(ClientConfig {
        stale_response_policy: StaleResponsePolicy::ApplyLatestArrival,
        ..ClientConfig::default()
    });
    h.load_video();
    let request = h.submit();
    h.update(Event::ClearRequested);
    h.respond(request, reply(200, VIDEO_RESULT));

    assert!(h.model.file.is_none());
    assert_eq!(
        h.model.result.as_ref().map(NormalizedResult::verdict),
        Some("NOT WORN")
    );
}

#[test]
fn new_file_clears_result_and_retires_submission() {
    let mut h = Harness::new();
    h.load_image(20, 20);
    let request = h.submit();
    h.respond(request, reply(200, TWO_HELMETS));
    let pending = h.submit();

    h.update(Event::file("second.jpg", Some("image/jpeg"), vec![9; 4]));
    assert!(h.model.result.is_none());

    h.respond(pending, reply(200, TWO_HELMETS));
    assert!(h.model.result.is_none());
}

#[test]
fn backend_rejection_in_200_body() {
    let mut h = Harness::new();
    h.load_video();
    let request = h.submit();
    h.respond(request, reply(200, r#"{"error":"Unsupported video format"}"#));

    let view = h.app.view(&h.model);
    let error = view.error.expect("error");
    assert_eq!(error.code, "PROTOCOL_ERROR");
    assert_eq!(error.message, "Backend error: Unsupported video format");
}
