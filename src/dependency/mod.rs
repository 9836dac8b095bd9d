//! Dependency resolution and cleanup.
//!
//! # Data Flow
//! ```text
//! KwargsModel (precomputed per handler)
//!     → resolve.rs: params → data → body
//!     → dependency batches (members concurrent, batches sequential)
//!     → Signature::parse (validation after every value exists)
//!     → (Kwargs, CleanupGroup)
//!
//! Handler invocation inside CleanupGroup::scope
//!     → release in reverse acquisition order, exactly once
//! ```

pub mod cleanup;
pub mod provider;
pub mod resolve;

pub use cleanup::{CleanupError, CleanupGroup, CleanupLease, ReleaseAction};
pub use provider::{Dependency, Provided};
pub use resolve::prepare;
