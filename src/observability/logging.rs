//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber
//! - Pick the output format from configuration
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` overrides the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(config: &ObservabilityConfig) -> String {
    format!(
        "route_dispatch={level},tower_http={level}",
        level = config.log_level.to_ascii_lowercase()
    )
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
}
