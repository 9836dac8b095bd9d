//! Authorization guards run before a handler is invoked.
//!
//! # Design Decisions
//! - Guards run in declaration order; the first denial ends the request
//! - A guard returns the `DispatchError` it wants rendered (401 vs 403)
//! - No guard ever sees the request body; they decide on scope data alone

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::handlers::Handler;
use crate::http::Request;

/// Authorization check for a connection.
#[async_trait]
pub trait Guard: Send + Sync {
    async fn check(&self, request: &Request, handler: &Handler) -> Result<(), DispatchError>;
}

/// Guard backed by a synchronous closure.
pub struct FnGuard<F>(F);

#[async_trait]
impl<F> Guard for FnGuard<F>
where
    F: Fn(&Request, &Handler) -> Result<(), DispatchError> + Send + Sync,
{
    async fn check(&self, request: &Request, handler: &Handler) -> Result<(), DispatchError> {
        (self.0)(request, handler)
    }
}

/// Wrap a closure as a guard.
pub fn guard_fn<F>(f: F) -> Arc<dyn Guard>
where
    F: Fn(&Request, &Handler) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    Arc::new(FnGuard(f))
}

/// Requires a header, optionally with an exact value.
///
/// Missing header is `401`, wrong value is `403`.
#[derive(Debug, Clone)]
pub struct RequireHeader {
    name: String,
    expected: Option<String>,
}

impl RequireHeader {
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected: None,
        }
    }

    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected: Some(value.into()),
        }
    }
}

#[async_trait]
impl Guard for RequireHeader {
    async fn check(&self, request: &Request, _handler: &Handler) -> Result<(), DispatchError> {
        let Some(value) = request.header(&self.name) else {
            return Err(DispatchError::NotAuthorized(format!(
                "Missing {} header",
                self.name
            )));
        };
        match &self.expected {
            Some(expected) if expected != value => Err(DispatchError::PermissionDenied(format!(
                "Invalid {} header",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

/// Run every guard of `handler` against `request`.
pub async fn authorize(request: &Request, handler: &Handler) -> Result<(), DispatchError> {
    for guard in handler.guards() {
        if let Err(e) = guard.check(request, handler).await {
            tracing::warn!(
                request_id = %request.request_id(),
                handler = %handler.name(),
                error = %e,
                "Authorization denied"
            );
            return Err(e);
        }
    }
    Ok(())
}
