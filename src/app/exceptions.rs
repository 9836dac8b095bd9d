//! Rendering of errors that escaped the dispatcher.

use axum::http::{Method, StatusCode};
use serde_json::json;

use crate::error::DispatchError;
use crate::http::response::Response;

/// What the renderer knows about the failed request.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub request_id: &'a str,
    /// Expose internal error details.
    pub debug: bool,
}

/// Turns a request error into the terminal response.
pub trait ExceptionHandler: Send + Sync {
    fn render(&self, error: &DispatchError, context: &ErrorContext<'_>) -> Response;
}

/// JSON renderer: `{"status_code": .., "detail": .., "extra": ..}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn render(&self, error: &DispatchError, context: &ErrorContext<'_>) -> Response {
        let status = error.status_code();
        let primary = match error {
            DispatchError::Compound { primary, .. } => primary.as_ref(),
            other => other,
        };

        let detail = match primary {
            DispatchError::Validation { .. } => {
                format!("Validation failed for {} {}", context.method, context.path)
            }
            _ if status == StatusCode::INTERNAL_SERVER_ERROR && !context.debug => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "status_code": status.as_u16(),
            "detail": detail,
        });
        if let DispatchError::Validation { errors } = primary {
            body["extra"] = errors.iter().map(|e| e.to_json()).collect();
        }

        let mut response = Response::json(status, &body);
        if let DispatchError::MethodNotAllowed { allowed } = primary {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            response.set_header("Allow", allow);
        }
        response
    }
}
