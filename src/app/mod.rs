//! Application entry point.
//!
//! # Data Flow
//! ```text
//! Scope + Receiver + Sender (from a transport)
//!     → App::handle
//!         → Router::resolve (path → route + path params, else 404)
//!         → HttpRoute::handle (method → handler → dispatch pipeline)
//!         → simple CORS headers folded into the response start
//!     → on error: ExceptionHandler renders the terminal response
//! ```
//!
//! # Design Decisions
//! - `App` is immutable and shared (`Arc`) across concurrent requests
//! - An error after the response has started is logged, never rendered twice

pub mod builder;
pub mod context;
pub mod exceptions;

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use axum::http::Method;

use crate::config::AppConfig;
use crate::error::DispatchError;
use crate::http::message::{Receiver, Sender, TransportError, WireMessage};
use crate::http::scope::Scope;
use crate::observability::metrics;
use crate::routing::Router;

pub use builder::AppBuilder;
pub use context::{AppContext, RequestLimits};
pub use exceptions::{DefaultExceptionHandler, ErrorContext, ExceptionHandler};

pub struct App {
    router: Router,
    context: Arc<AppContext>,
    exception_handler: Arc<dyn ExceptionHandler>,
    config: AppConfig,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("routes", &self.router.len())
            .field("context", &self.context)
            .finish()
    }
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Serve one request end to end.
    ///
    /// Only transport failures are returned; every other error is rendered
    /// into a response through the exception handler.
    pub async fn handle(
        &self,
        mut scope: Scope,
        receiver: Arc<dyn Receiver>,
        sender: &dyn Sender,
    ) -> Result<(), TransportError> {
        let start = Instant::now();
        let method = scope.method.clone();
        let path = scope.path.clone();
        let request_id = scope.request_id.clone();
        let state = scope.state.clone();

        let sender = ResponseTracker::new(sender, self.cors_headers(&scope));

        let result = match self.router.resolve(&scope.path) {
            Some((route, params)) => {
                scope.path_params = params;
                route.handle(scope, receiver, &sender, self.context.clone()).await
            }
            None => Err(DispatchError::NotFound),
        };

        if let Err(error) = result {
            if sender.status().is_some() {
                tracing::error!(
                    request_id = %request_id,
                    error = %error,
                    "Request failed after the response started"
                );
            } else {
                if error.is_client_error() {
                    tracing::debug!(request_id = %request_id, error = %error, "Request rejected");
                } else {
                    tracing::error!(request_id = %request_id, error = %error, "Request failed");
                }
                let context = ErrorContext {
                    method: &method,
                    path: &path,
                    request_id: &request_id,
                    debug: self.context.debug,
                };
                let response = self.exception_handler.render(&error, &context);
                response.send(&sender).await?;
            }
        }

        let status = sender.status().unwrap_or(500);
        metrics::record_request(method.as_str(), status, state.is_cached(), start);
        tracing::debug!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status,
            cached = state.is_cached(),
            "Request completed"
        );
        Ok(())
    }

    /// Simple CORS headers for a non-preflight request from an allowed origin.
    fn cors_headers(&self, scope: &Scope) -> Vec<(String, String)> {
        let Some(cors) = self.context.cors.as_deref() else {
            return Vec::new();
        };
        if scope.method == Method::OPTIONS {
            return Vec::new();
        }
        scope
            .headers
            .get("origin")
            .and_then(|v| v.to_str().ok())
            .map(|origin| cors.simple_headers(origin))
            .unwrap_or_default()
    }
}

/// Sender wrapper that records the response status and merges extra headers
/// into the response start.
struct ResponseTracker<'a> {
    inner: &'a dyn Sender,
    extra_headers: Vec<(String, String)>,
    status: OnceLock<u16>,
}

impl<'a> ResponseTracker<'a> {
    fn new(inner: &'a dyn Sender, extra_headers: Vec<(String, String)>) -> Self {
        Self {
            inner,
            extra_headers,
            status: OnceLock::new(),
        }
    }

    fn status(&self) -> Option<u16> {
        self.status.get().copied()
    }
}

#[async_trait]
impl Sender for ResponseTracker<'_> {
    async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        let message = match message {
            WireMessage::Start { status, mut headers } => {
                for (name, value) in &self.extra_headers {
                    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)) {
                        headers.push((name.clone(), value.clone()));
                    }
                }
                WireMessage::Start { status, headers }
            }
            body => body,
        };
        let status = message.status();
        self.inner.send(message).await?;
        if let Some(status) = status {
            let _ = self.status.set(status);
        }
        Ok(())
    }
}
