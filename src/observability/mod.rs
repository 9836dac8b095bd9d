//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch pipeline produces:
//!     → logging.rs (structured log events, request id on every event)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
