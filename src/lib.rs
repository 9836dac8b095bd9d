//! Per-request HTTP dispatch pipeline for an ASGI-style application server.
//!
//! An [`App`] routes a connection [`Scope`](http::Scope) to an [`HttpRoute`](routing::HttpRoute),
//! picks the handler for the request method, negotiates CORS preflights, serves or
//! fills the response cache, resolves handler inputs and dependencies, invokes the
//! handler, and releases every per-request resource on every exit path.
//!
//! # Module Map
//! ```text
//! app            App, AppBuilder, AppContext, exception rendering
//! routing        path router, method route table, request dispatcher
//! handlers       Handler, kwargs model, signature validation, OPTIONS negotiator handler
//! dependency     dependency providers, batch resolution, cleanup group
//! cache          response cache gateway and key-value stores
//! security       CORS policy + preflight negotiation, guards
//! http           scope, wire messages, request/response, forms, axum server
//! config         TOML configuration, validation
//! observability  logging, metrics
//! lifecycle      shutdown coordination, signals
//! testing        in-memory TestClient
//! ```

pub mod app;
pub mod cache;
pub mod config;
pub mod dependency;
pub mod error;
pub mod handlers;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;
pub mod testing;

pub use app::{App, AppBuilder};
pub use config::AppConfig;
pub use error::{BuildError, DispatchError};
pub use handlers::{Handler, Kwargs, Payload};
pub use http::{HttpServer, Request, Response};
pub use lifecycle::Shutdown;
