//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, request ID)
//!     → scope.rs + message.rs (Scope, Receiver, Sender handed to the app)
//!     → request.rs (typed request, body/JSON/form decoding via form.rs)
//!     → response.rs (Response → Start/Body wire messages)
//!     → server.rs (wire messages → HTTP response)
//! ```

pub mod form;
pub mod message;
pub mod request;
pub mod response;
pub mod scope;
pub mod server;

pub use form::{FormData, FormValue, UploadFile};
pub use message::{
    BufferedReceiver, BufferedSender, ReceiveEvent, Receiver, Sender, TransportError, WireMessage,
};
pub use request::Request;
pub use response::Response;
pub use scope::{Scope, ScopeState};
pub use server::{ChannelSender, HttpServer, X_REQUEST_ID};
