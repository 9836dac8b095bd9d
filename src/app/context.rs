//! Application-wide state every request can reach.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::config::{AppConfig, UploadConfig};
use crate::security::cors::CorsPolicy;

/// Limits applied while reading request bodies.
#[derive(Debug, Clone)]
pub struct RequestLimits {
    pub max_body_size: usize,
    pub multipart_part_limit: usize,
    /// Directory for spooled uploads; the system temp dir when unset.
    pub upload_dir: Option<PathBuf>,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for RequestLimits {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_body_size: config.max_body_size,
            multipart_part_limit: config.multipart_part_limit,
            upload_dir: config.temp_dir.clone(),
        }
    }
}

/// Shared, read-only context handed to each `Request`.
#[derive(Debug, Clone, Default)]
pub struct AppContext {
    pub cors: Option<Arc<CorsPolicy>>,
    pub response_cache: ResponseCache,
    pub limits: RequestLimits,
    /// Include error details in 500 responses.
    pub debug: bool,
}

impl AppContext {
    pub fn new(
        cors: Option<Arc<CorsPolicy>>,
        response_cache: ResponseCache,
        limits: RequestLimits,
    ) -> Self {
        Self {
            cors,
            response_cache,
            limits,
            debug: false,
        }
    }

    pub fn from_config(config: &AppConfig, response_cache: ResponseCache) -> Result<Self, crate::error::BuildError> {
        let cors = config
            .cors
            .as_ref()
            .map(CorsPolicy::from_config)
            .transpose()?
            .map(Arc::new);
        Ok(Self {
            cors,
            response_cache,
            limits: RequestLimits::from(&config.uploads),
            debug: config.debug,
        })
    }
}
