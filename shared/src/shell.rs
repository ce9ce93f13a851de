//! Native shell: drives the core and executes the effects it requests.
//!
//! Everything runs on the caller's tokio runtime. `dispatch` hands an event to
//! the [`Core`] and handles synchronous effects inline; HTTP and decode work is
//! spawned into a `JoinSet` whose completions are resolved one at a time by
//! [`Shell::next_completion`]. Run it on a `current_thread` runtime to keep the
//! core on one thread.

use std::collections::HashMap;
use std::sync::Arc;
#[cfg(feature = "shell")]
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use crux_core::{Core, Request};
use crux_http::protocol::{HttpRequest, HttpResult};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

use crate::app::App;
use crate::capabilities::{Capabilities, DecodeOperation, DecodeOutput, Effect, PreviewOperation};
use crate::config::ClientConfig;
use crate::event::Event;
use crate::image_processing::{decode_image_async, DecodeLimits};
use crate::model::{PreviewId, ViewModel};

#[cfg(feature = "shell")]
use crate::{AppError, ErrorKind};
#[cfg(feature = "shell")]
use crux_http::protocol::{HttpHeader, HttpResponse};

/// Performs one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> HttpResult;
}

/// A finished effect waiting to be handed back to the core.
enum Completion {
    Http(Request<HttpRequest>, HttpResult),
    Decode(Request<DecodeOperation>, DecodeOutput),
}

pub struct Shell<T: Transport> {
    core: Core<Effect, App>,
    transport: Arc<T>,
    tasks: JoinSet<Completion>,
    previews: HashMap<PreviewId, Bytes>,
    decode_limits: DecodeLimits,
    view_tx: watch::Sender<ViewModel>,
}

impl<T: Transport> Shell<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let core = Core::new::<Capabilities>();
        let decode_limits = DecodeLimits {
            max_input_bytes: config.max_upload_bytes,
            ..DecodeLimits::default()
        };
        let (view_tx, _) = watch::channel(core.view());
        let mut shell = Self {
            core,
            transport: Arc::new(transport),
            tasks: JoinSet::new(),
            previews: HashMap::new(),
            decode_limits,
            view_tx,
        };
        shell.dispatch(Event::Configured(Box::new(config)));
        shell
    }

    /// Observers get the latest view after every render.
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> ViewModel {
        self.core.view()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Bytes behind a live preview reference.
    pub fn preview(&self, id: &PreviewId) -> Option<&Bytes> {
        self.previews.get(id)
    }

    pub fn live_previews(&self) -> usize {
        self.previews.len()
    }

    /// Effects still running.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    #[instrument(skip_all, fields(event = event.name()))]
    pub fn dispatch(&mut self, event: Event) {
        for effect in self.core.process_event(event) {
            self.process(effect);
        }
    }

    fn process(&mut self, effect: Effect) {
        match effect {
            Effect::Render(_) => {
                self.view_tx.send_replace(self.core.view());
            }

            Effect::Preview(request) => match request.operation {
                PreviewOperation::Acquire { id, bytes } => {
                    debug!(%id, size = bytes.len(), "preview acquired");
                    self.previews.insert(id, bytes);
                }
                PreviewOperation::Release { id } => {
                    if self.previews.remove(&id).is_some() {
                        debug!(%id, "preview released");
                    } else {
                        warn!(%id, "release of unknown preview");
                    }
                }
            },

            Effect::Http(mut request) => {
                let operation = std::mem::take(&mut request.operation);
                let transport = Arc::clone(&self.transport);
                self.tasks.spawn(async move {
                    let url = operation.url.clone();
                    // The core must hear back even if the transport panics, so
                    // the exchange gets its own task.
                    let result = match tokio::spawn(async move { transport.execute(operation).await }).await {
                        Ok(result) => result,
                        Err(e) => {
                            error!(%url, error = %e, "transport task failed");
                            HttpResult::Err(crux_http::Error::Io("transport task failed".into()))
                        }
                    };
                    Completion::Http(request, result)
                });
            }

            Effect::Decode(mut request) => {
                let bytes = std::mem::take(&mut request.operation.bytes);
                let limits = self.decode_limits.clone();
                self.tasks.spawn(async move {
                    let output = decode_image_async(bytes, limits).await;
                    Completion::Decode(request, output)
                });
            }
        }
    }

    /// Waits for one outstanding effect and resolves it. Returns `false` when
    /// nothing is outstanding.
    pub async fn next_completion(&mut self) -> bool {
        let effects = match self.tasks.join_next().await {
            None => return false,
            Some(Ok(Completion::Http(mut request, result))) => self.core.resolve(&mut request, result),
            Some(Ok(Completion::Decode(mut request, output))) => self.core.resolve(&mut request, output),
            Some(Err(e)) => {
                error!(error = %e, "effect task failed");
                return true;
            }
        };
        for effect in effects {
            self.process(effect);
        }
        true
    }

    /// Runs until no effect is outstanding.
    pub async fn settle(&mut self) {
        while self.next_completion().await {}
    }
}

/// Anything larger than this is not a detection response.
#[cfg(feature = "shell")]
pub const MAX_RESPONSE_BODY_SIZE: usize = 16 * 1024 * 1024;

#[cfg(feature = "shell")]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "shell")]
impl ReqwestTransport {
    /// The configured request timeout applies to every exchange.
    pub fn new(config: &ClientConfig) -> Result<Self, AppError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            AppError::new(ErrorKind::Internal, "HTTP client could not be created")
                .with_internal(e.to_string())
        })?;
        Ok(Self { client })
    }

    fn map_error(e: &reqwest::Error) -> crux_http::Error {
        if e.is_timeout() {
            crux_http::Error::Timeout
        } else if e.is_builder() {
            crux_http::Error::Url(e.to_string())
        } else {
            crux_http::Error::Io(e.to_string())
        }
    }

    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, crux_http::Error> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| crux_http::Error::Url(e.to_string()))?;

        let mut builder = self.client.request(method, request.url.as_str());
        for header in &request.headers {
            builder = builder.header(header.name.as_str(), header.value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| Self::map_error(&e))?;

        if let Some(len) = response.content_length() {
            if usize::try_from(len).map_or(true, |len| len > MAX_RESPONSE_BODY_SIZE) {
                return Err(crux_http::Error::Io(format!(
                    "response of {len} bytes exceeds {MAX_RESPONSE_BODY_SIZE}"
                )));
            }
        }

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                Some(HttpHeader {
                    name: name.as_str().to_string(),
                    value: value.to_str().ok()?.to_string(),
                })
            })
            .collect();

        let body = response.bytes().await.map_err(|e| Self::map_error(&e))?;
        if body.len() > MAX_RESPONSE_BODY_SIZE {
            return Err(crux_http::Error::Io(format!(
                "response of {} bytes exceeds {MAX_RESPONSE_BODY_SIZE}",
                body.len()
            )));
        }

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(feature = "shell")]
#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let start = Instant::now();
        let result = self.exchange(request).await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(response) => {
                debug!(status = response.status, bytes = response.body.len(), duration_ms, "exchange finished");
                HttpResult::Ok(response)
            }
            Err(e) => {
                warn!(error = %e, duration_ms, "exchange failed");
                HttpResult::Err(e)
            }
        }
    }
}

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Returns `false` if a global subscriber was already set.
#[cfg(feature = "shell")]
pub fn init_tracing() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
