//! Server lifecycle: signals in, graceful drain out.
//!
//! # Data Flow
//! ```text
//! signals.rs: SIGINT / SIGTERM
//!     → shutdown.rs: Shutdown::trigger (sticky, first call wins)
//!     → HttpServer::run stops accepting and drains in-flight dispatches
//!     → main.rs bounds the drain by `timeouts.shutdown_grace_secs`
//! ```
//!
//! # Design Decisions
//! - Requests still running at the grace deadline are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
