//! HTTP route: one path, several method handlers, and the per-request dispatcher.
//!
//! # Responsibilities
//! - Own the method table for a path (with a synthesized `OPTIONS` handler)
//! - Drive a request through routing, authorization, cache lookup,
//!   resolution, invocation, response and cleanup
//!
//! # Design Decisions
//! - One request, one pass: every stage runs at most once
//! - Dependency cleanup wraps the handler call; upload cleanup wraps everything
//! - Cached responses are replayed verbatim and skip resolution entirely

use std::sync::Arc;

use axum::http::Method;

use crate::app::AppContext;
use crate::dependency::resolve::prepare;
use crate::error::{BuildError, DispatchError};
use crate::handlers::{options_handler, Handler};
use crate::http::message::{send_messages, Receiver, Sender};
use crate::http::response::Response;
use crate::http::scope::Scope;
use crate::http::Request;
use crate::routing::matcher::PathPattern;
use crate::routing::table::RouteMethodTable;
use crate::security::guards::authorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Routing,
    Authorizing,
    CacheLookup,
    Resolving,
    Invoking,
    Responding,
    Cleanup,
    Done,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Routing => "routing",
            Stage::Authorizing => "authorizing",
            Stage::CacheLookup => "cache_lookup",
            Stage::Resolving => "resolving",
            Stage::Invoking => "invoking",
            Stage::Responding => "responding",
            Stage::Cleanup => "cleanup",
            Stage::Done => "done",
        }
    }
}

fn enter(request: &Request, stage: Stage) {
    tracing::trace!(
        request_id = %request.request_id(),
        handler = %request.handler_name(),
        stage = stage.as_str(),
        "Dispatch stage"
    );
}

#[derive(Debug)]
pub struct HttpRoute {
    pattern: PathPattern,
    table: RouteMethodTable,
}

impl HttpRoute {
    /// Build a route. Adds the preflight negotiator unless a handler claims `OPTIONS`.
    pub fn new(path: &str, handlers: Vec<Arc<Handler>>) -> Result<Self, BuildError> {
        let pattern = PathPattern::parse(path)?;
        let mut handlers = handlers;

        let mut methods: Vec<Method> = Vec::new();
        for method in handlers.iter().flat_map(|h| h.methods()) {
            if !methods.contains(method) {
                methods.push(method.clone());
            }
        }
        if !methods.contains(&Method::OPTIONS) {
            handlers.push(Arc::new(options_handler(methods)?));
        }

        let table = RouteMethodTable::build(pattern.path(), handlers)?;
        Ok(Self { pattern, table })
    }

    pub fn path(&self) -> &str {
        self.pattern.path()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn table(&self) -> &RouteMethodTable {
        &self.table
    }

    pub fn methods(&self) -> Vec<Method> {
        self.table.methods()
    }

    /// Serve one request bound to this route.
    ///
    /// Errors are returned to the caller for rendering. Temporary uploads are
    /// closed before this returns, whatever the outcome.
    pub async fn handle(
        &self,
        scope: Scope,
        receiver: Arc<dyn Receiver>,
        sender: &dyn Sender,
        context: Arc<AppContext>,
    ) -> Result<(), DispatchError> {
        let Some(handler) = self.table.lookup(&scope.method).cloned() else {
            return Err(DispatchError::MethodNotAllowed {
                allowed: self.table.methods(),
            });
        };
        let request = Request::new(scope, receiver, context, handler.name());
        enter(&request, Stage::Routing);

        let result = self.dispatch(&handler, &request, sender).await;

        enter(&request, Stage::Cleanup);
        let closed = request.close_uploads().await;
        if closed > 0 {
            tracing::debug!(request_id = %request.request_id(), closed, "Closed temporary uploads");
        }
        enter(&request, Stage::Done);
        result
    }

    async fn dispatch(
        &self,
        handler: &Handler,
        request: &Request,
        sender: &dyn Sender,
    ) -> Result<(), DispatchError> {
        if !handler.guards().is_empty() {
            enter(request, Stage::Authorizing);
            authorize(request, handler).await?;
        }

        let cache = &request.context().response_cache;
        let cached = match handler.cache() {
            Some(policy) => {
                enter(request, Stage::CacheLookup);
                cache.read(request, policy).await?
            }
            None => None,
        };

        let messages = match cached {
            Some(messages) => messages,
            None => {
                let response = self.call_handler(handler, request).await?;
                enter(request, Stage::Responding);
                let messages = response.into_messages();
                if let Some(policy) = handler.cache() {
                    cache.write(request, policy, &messages).await?;
                }
                messages
            }
        };

        send_messages(&messages, sender).await?;
        handler.after_response(request).await
    }

    async fn call_handler(&self, handler: &Handler, request: &Request) -> Result<Response, DispatchError> {
        enter(request, Stage::Resolving);
        let payload = match handler.before_request(request).await? {
            Some(payload) if !payload.is_empty() => payload,
            _ => {
                let (kwargs, mut cleanup) = prepare(handler.kwargs_model(), handler.signature(), request).await?;
                enter(request, Stage::Invoking);
                let lease = cleanup.lease();
                cleanup.scope(handler.invoke_leased(request, kwargs, lease)).await?
            }
        };
        handler.to_response(request, payload)
    }
}
