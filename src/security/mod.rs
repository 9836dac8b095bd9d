//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! OPTIONS request:
//!     → cors.rs (negotiate preflight against the app's CorsPolicy)
//!     → 204 with Allow / CORS headers, or 400 with every failure reason
//!
//! Any other request:
//!     → guards.rs (handler guards, in order, before any handler code)
//!     → cors.rs (simple CORS headers added to the response start)
//! ```
//!
//! # Design Decisions
//! - Fail closed: the first guard denial ends the request
//! - The CORS policy is compiled once at startup and shared read-only

pub mod cors;
pub mod guards;

pub use cors::{negotiate_preflight, CorsPolicy, DenialReason, PreflightOutcome};
pub use guards::{guard_fn, Guard, RequireHeader};
