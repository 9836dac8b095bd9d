//! Error types shared across the dispatch pipeline.
//!
//! # Design Decisions
//! - `DispatchError` is the single request-time error; every stage returns it
//! - `BuildError` is construction-time only and never reaches a request
//! - Status mapping lives here so the exception handler stays a thin renderer

use axum::http::{Method, StatusCode};
use thiserror::Error;

use crate::cache::store::StoreError;
use crate::dependency::cleanup::CleanupError;
use crate::handlers::signature::ParameterError;
use crate::http::message::TransportError;

/// Boxed error produced by user code (handlers, hooks, providers, releases).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A payload could not be encoded or decoded.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SerializationError(pub String);

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Failure while handling a single request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed { allowed: Vec<Method> },

    /// Malformed client input, e.g. an undecodable request body.
    #[error("{detail}")]
    Client { detail: String },

    #[error("Validation failed: {}", format_parameter_errors(.errors))]
    Validation { errors: Vec<ParameterError> },

    #[error("{0}")]
    NotAuthorized(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("handler failed: {0}")]
    Handler(BoxError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    /// The request failed and releasing its dependencies failed too.
    #[error("{primary}; {cleanup}")]
    Compound {
        primary: Box<DispatchError>,
        cleanup: CleanupError,
    },

    #[error("{0}")]
    Internal(String),
}

impl DispatchError {
    /// Wrap an arbitrary user error.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    pub fn client(detail: impl Into<String>) -> Self {
        Self::Client {
            detail: detail.into(),
        }
    }

    /// HTTP status this error maps to when rendered.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Client { .. } | Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotAuthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Compound { primary, .. } => primary.status_code(),
            Self::Serialization(_)
            | Self::Store(_)
            | Self::Transport(_)
            | Self::Handler(_)
            | Self::Cleanup(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

fn format_parameter_errors(errors: &[ParameterError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Invalid application wiring, detected before any request is served.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("handler already registered for path {path:?} and http method {method}")]
    DuplicateRegistration { path: String, method: Method },

    #[error("path {0:?} is registered twice")]
    DuplicatePath(String),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("handler {0:?} declares no http methods")]
    NoMethods(String),

    #[error("handler {0:?} has no function attached")]
    MissingHandlerFn(String),

    #[error("kwarg {0:?} is declared more than once")]
    ConflictingKwarg(String),

    #[error("dependency {key:?} requires unknown dependency {missing:?}")]
    UnknownDependency { key: String, missing: String },

    #[error("dependency cycle between {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("invalid CORS origin pattern: {0}")]
    InvalidCorsPattern(#[from] regex::Error),

    #[error("invalid CORS method {0:?}")]
    InvalidCorsMethod(String),
}
