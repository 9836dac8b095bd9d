//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → AppBuilder compiles CORS policy, cache and limits from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, CorsConfig, ListenerConfig, LogFormat, ObservabilityConfig, ResponseCacheConfig,
    SecurityConfig, TimeoutConfig, UploadConfig,
};
pub use validation::{validate_config, ValidationError};
