//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the application server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the application server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// CORS policy. CORS handling is disabled when absent.
    pub cors: Option<CorsConfig>,

    /// Response cache settings.
    pub response_cache: ResponseCacheConfig,

    /// Request body and upload limits.
    pub uploads: UploadConfig,

    /// Security hardening settings.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Expose internal error details in 500 responses.
    pub debug: bool,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum requests in flight; further requests wait for a slot.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Grace period for in-flight requests on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// CORS configuration.
///
/// `"*"` in any of the allow lists means "allow all".
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Regex matched against the full origin.
    pub allow_origin_regex: Option<String>,
    pub expose_headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: vec!["*".to_string()],
            allow_headers: vec!["*".to_string()],
            allow_credentials: false,
            allow_origin_regex: None,
            expose_headers: Vec::new(),
            max_age: 600,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseCacheConfig {
    /// Prefix applied to every cache key.
    pub key_prefix: String,

    /// Expiration for handlers using the default TTL; `None` never expires.
    pub default_expiration_secs: Option<u64>,

    /// Request headers that take part in the default cache key.
    pub vary_headers: Vec<String>,

    /// How often the server purges expired entries from the store.
    pub sweep_interval_secs: u64,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "route-dispatch:".to_string(),
            default_expiration_secs: Some(60),
            vary_headers: Vec::new(),
            sweep_interval_secs: 30,
        }
    }
}

/// Request body and multipart upload limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,

    /// Maximum number of parts in a multipart body.
    pub multipart_part_limit: usize,

    /// Directory for spooled upload files (system temp dir when unset).
    pub temp_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10MB
            multipart_part_limit: 1000,
            temp_dir: None,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Add security response headers (nosniff, frame options).
    pub enable_headers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
