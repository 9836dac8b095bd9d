//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Scope (method, path)
//!     → router.rs (path lookup, captures path params)
//!     → route.rs (HttpRoute::handle)
//!         → table.rs (method lookup, 405 with Allow list on miss)
//!         → guards → cache → resolve → invoke → respond → cleanup
//!
//! Route Compilation (at startup):
//!     handlers grouped by path
//!     → matcher.rs (compile path pattern)
//!     → table.rs (one handler per method, OPTIONS synthesized)
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in the hot path (segment matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod route;
pub mod router;
pub mod table;

pub use matcher::PathPattern;
pub use route::HttpRoute;
pub use router::Router;
pub use table::RouteMethodTable;
