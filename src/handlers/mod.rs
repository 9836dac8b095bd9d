//! Route handlers and the precomputed plans used to call them.
//!
//! # Data Flow
//! ```text
//! HandlerBuilder (registration)
//!     → params.rs: KwargsModel (params, data, body, dependency batches)
//!     → signature.rs: DeclaredSignature (coercion + constraints)
//!     → handler.rs: immutable Handler
//!
//! Per request:
//!     Kwargs (kwargs.rs) → Handler::invoke → Payload → ResponseConverter → Response
//! ```

pub mod handler;
pub mod kwargs;
pub mod options;
pub mod params;
pub mod signature;

pub use handler::{
    DefaultConverter, ExecutionMode, Handler, HandlerBuilder, HandlerFn, Payload, ResponseConverter,
};
pub use kwargs::{Kwargs, Value};
pub use options::options_handler;
pub use params::{DataEncoding, KwargsModel, ParamSource, ParamSpec, ParamType};
pub use signature::{DeclaredSignature, ParameterError, Signature, ValidationError};
