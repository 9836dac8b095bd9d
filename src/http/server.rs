//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router whose fallback feeds every request into `App::handle`
//! - Wire up middleware (request id, tracing, concurrency limit, timeout, body limit, security headers)
//! - Adapt axum requests to `Scope` + `Receiver`, and stream wire messages back as responses
//! - Bind server to listener, sweep the response cache, and drain on shutdown

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{Body, BodyDataStream},
    extract::{ConnectInfo, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tower::{limit::ConcurrencyLimitLayer, ServiceBuilder};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::app::App;
use crate::cache::run_sweeper;
use crate::http::message::{ReceiveEvent, Receiver, Sender, TransportError, WireMessage};
use crate::http::scope::Scope;
use crate::lifecycle::Shutdown;

pub const X_REQUEST_ID: &str = "x-request-id";

/// HTTP transport for an [`App`].
pub struct HttpServer {
    app: Arc<App>,
    router: Router,
}

impl HttpServer {
    pub fn new(app: App) -> Self {
        let app = Arc::new(app);
        let router = Self::build_router(app.clone());
        Self { app, router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(app: Arc<App>) -> Router {
        let config = app.config().clone();

        let mut router = Router::new().fallback(dispatch).with_state(app).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    HeaderName::from_static(X_REQUEST_ID),
                    MakeRequestUuid,
                ))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID)))
                .layer(ConcurrencyLimitLayer::new(config.listener.max_connections))
                .layer(RequestBodyLimitLayer::new(config.uploads.max_body_size))
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        );

        if config.security.enable_headers {
            router = router
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ));
        }
        router
    }

    /// The axum router, for embedding or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, routes = self.app.router().len(), "HTTP server starting");

        let sweeper = tokio::spawn(run_sweeper(
            self.app.context().response_cache.store().clone(),
            Duration::from_secs(self.app.config().response_cache.sweep_interval_secs),
            shutdown.clone(),
        ));

        let shutdown = shutdown.clone();
        let service = self.router.into_make_service_with_connect_info::<SocketAddr>();

        let served = axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await;
        sweeper.abort();
        served?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Fallback handler: every request goes through the application.
///
/// The application runs in its own task and the response is returned as soon
/// as it sends the start message, so `after_response` hooks never hold up the
/// client. Dropping the response future before that point (timeout) aborts the
/// task.
async fn dispatch(State(app): State<Arc<App>>, request: axum::extract::Request) -> Response {
    let (parts, body) = request.into_parts();

    let client = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut scope = Scope::new(parts.method, parts.uri.path())
        .with_query(parts.uri.query().unwrap_or_default())
        .with_headers(parts.headers);
    if let Some(client) = client {
        scope = scope.with_client(client);
    }
    if let Some(request_id) = request_id {
        scope = scope.with_request_id(request_id);
    }

    let receiver = Arc::new(BodyReceiver::new(body));
    let (sender, mut messages) = ChannelSender::new(RESPONSE_CHANNEL_CAPACITY);
    let task = tokio::spawn(async move {
        if let Err(e) = app.handle(scope, receiver, &sender).await {
            tracing::warn!(error = %e, "Transport failure while serving request");
        }
    });
    let guard = AbortOnDrop(Some(task.abort_handle()));

    let Some(first) = messages.recv().await else {
        tracing::error!("Application finished without starting a response");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    guard.disarm();
    into_streaming_response(first, messages)
}

const RESPONSE_CHANNEL_CAPACITY: usize = 16;

/// Aborts the application task unless disarmed.
struct AbortOnDrop(Option<AbortHandle>);

impl AbortOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// Forwards wire messages to the response body through a bounded channel.
///
/// Enforces the message order: one start, then body chunks.
pub struct ChannelSender {
    tx: mpsc::Sender<WireMessage>,
    started: AtomicBool,
}

impl ChannelSender {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WireMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sender = Self {
            tx,
            started: AtomicBool::new(false),
        };
        (sender, rx)
    }
}

#[async_trait]
impl Sender for ChannelSender {
    async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        let is_start = matches!(message, WireMessage::Start { .. });
        match (is_start, self.started.load(Ordering::Acquire)) {
            (true, true) => return Err(TransportError::AlreadyStarted),
            (false, false) => return Err(TransportError::NotStarted),
            _ => {}
        }
        if is_start {
            self.started.store(true, Ordering::Release);
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Streams an axum request body as receive events.
pub struct BodyReceiver {
    stream: Mutex<BodyDataStream>,
}

impl BodyReceiver {
    pub fn new(body: Body) -> Self {
        Self {
            stream: Mutex::new(body.into_data_stream()),
        }
    }
}

#[async_trait]
impl Receiver for BodyReceiver {
    async fn receive(&self) -> Result<ReceiveEvent, TransportError> {
        let mut stream = self.stream.lock().await;
        match stream.next().await {
            Some(Ok(body)) => Ok(ReceiveEvent::Body {
                body,
                more_body: true,
            }),
            Some(Err(e)) => {
                let inner = e.into_inner();
                if inner.is::<http_body_util::LengthLimitError>() {
                    Err(TransportError::LengthLimit)
                } else {
                    Err(TransportError::Body(inner.to_string()))
                }
            }
            None => Ok(ReceiveEvent::Body {
                body: Bytes::new(),
                more_body: false,
            }),
        }
    }
}

/// Build the axum response from the start message; body chunks keep
/// streaming from `messages` until the final one.
fn into_streaming_response(first: WireMessage, messages: mpsc::Receiver<WireMessage>) -> Response {
    let WireMessage::Start { status, headers } = first else {
        tracing::error!("Application sent a body before starting the response");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }

    let chunks = stream::unfold(Some(messages), |state| async move {
        let mut messages = state?;
        loop {
            match messages.recv().await? {
                WireMessage::Body { body, more_body } => {
                    let next = more_body.then_some(messages);
                    return Some((Ok::<_, Infallible>(body), next));
                }
                WireMessage::Start { .. } => continue,
            }
        }
    });

    match builder.body(Body::from_stream(chunks)) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Invalid response produced by application");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
