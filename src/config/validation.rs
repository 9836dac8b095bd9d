//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0, addresses parse)
//! - Validate the CORS policy compiles (methods, origin regex)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::Method;
use thiserror::Error;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Check every semantic rule, collecting all failures.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.uploads.max_body_size == 0 {
        errors.push(ValidationError::new("uploads.max_body_size", "must be greater than 0"));
    }
    if config.uploads.multipart_part_limit == 0 {
        errors.push(ValidationError::new(
            "uploads.multipart_part_limit",
            "must be greater than 0",
        ));
    }
    if let Some(dir) = &config.uploads.temp_dir {
        if !dir.is_dir() {
            errors.push(ValidationError::new(
                "uploads.temp_dir",
                format!("{} is not a directory", dir.display()),
            ));
        }
    }
    if config.response_cache.default_expiration_secs == Some(0) {
        errors.push(ValidationError::new(
            "response_cache.default_expiration_secs",
            "must be greater than 0 (omit it to never expire)",
        ));
    }
    if config.response_cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "response_cache.sweep_interval_secs",
            "must be greater than 0",
        ));
    }

    if let Some(cors) = &config.cors {
        for method in cors.allow_methods.iter().filter(|m| m.as_str() != "*") {
            if Method::from_bytes(method.to_ascii_uppercase().as_bytes()).is_err() {
                errors.push(ValidationError::new(
                    "cors.allow_methods",
                    format!("{method:?} is not an HTTP method"),
                ));
            }
        }
        if let Some(pattern) = &cors.allow_origin_regex {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ValidationError::new("cors.allow_origin_regex", e.to_string()));
            }
        }
        if cors.allow_credentials && cors.allow_origins.iter().any(|o| o == "*") {
            errors.push(ValidationError::new(
                "cors.allow_credentials",
                "cannot be combined with a wildcard origin",
            ));
        }
    }

    let observability = &config.observability;
    if !matches!(
        observability.log_level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CorsConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = AppConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.timeouts.request_secs = 0;
        config.response_cache.sweep_interval_secs = 0;
        config.cors = Some(CorsConfig {
            allow_methods: vec!["GET".into(), "NOT A METHOD".into()],
            allow_origin_regex: Some("(".into()),
            ..CorsConfig::default()
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "timeouts.request_secs",
                "response_cache.sweep_interval_secs",
                "cors.allow_methods",
                "cors.allow_origin_regex",
            ]
        );
    }

    #[test]
    fn test_credentials_with_wildcard_origin() {
        let config = AppConfig {
            cors: Some(CorsConfig {
                allow_credentials: true,
                ..CorsConfig::default()
            }),
            ..AppConfig::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "cors.allow_credentials");
    }
}
