//! CORS policy and preflight negotiation.
//!
//! # Responsibilities
//! - Compile a `CorsConfig` into an immutable `CorsPolicy`
//! - Negotiate `OPTIONS` preflight requests against the policy
//! - Provide the simple (non-preflight) headers for allowed origins
//!
//! # Design Decisions
//! - Negotiation is a pure function of headers + policy, no I/O
//! - Failures accumulate (method, then Origin, then headers) so one response reports all
//! - Default preflight headers are precomputed once and copied per request

use std::collections::{BTreeSet, HashSet};

use axum::http::{HeaderMap, Method, StatusCode};
use regex::Regex;

use crate::config::CorsConfig;
use crate::error::BuildError;
use crate::http::response::Response;

/// Headers always granted when the policy allows every header.
pub const DEFAULT_ALLOWED_CORS_HEADERS: [&str; 4] =
    ["Accept", "Accept-Language", "Content-Language", "Content-Type"];

const STANDARD_METHODS: [&str; 7] = ["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];

pub const ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";
pub const ALLOW_HEADERS: &str = "Access-Control-Allow-Headers";
pub const ALLOW_METHODS: &str = "Access-Control-Allow-Methods";
pub const ALLOW_CREDENTIALS: &str = "Access-Control-Allow-Credentials";
pub const EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";
pub const MAX_AGE: &str = "Access-Control-Max-Age";
pub const REQUEST_METHOD: &str = "access-control-request-method";
pub const REQUEST_HEADERS: &str = "access-control-request-headers";

/// Compiled, immutable CORS policy.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_all_origins: bool,
    allow_origins: HashSet<String>,
    origin_regex: Option<Regex>,
    allow_all_methods: bool,
    allow_methods: BTreeSet<String>,
    allow_all_headers: bool,
    /// Lowercased.
    allow_headers: BTreeSet<String>,
    allow_credentials: bool,
    expose_headers: BTreeSet<String>,
    preflight_headers: Vec<(String, String)>,
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig) -> Result<Self, BuildError> {
        let allow_all_origins = config.allow_origins.iter().any(|o| o == "*");
        let allow_all_methods = config.allow_methods.iter().any(|m| m == "*");
        let allow_all_headers = config.allow_headers.iter().any(|h| h == "*");

        let origin_regex = config
            .allow_origin_regex
            .as_deref()
            .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
            .transpose()?;

        let mut allow_methods = BTreeSet::new();
        for method in config.allow_methods.iter().filter(|m| *m != "*") {
            let method = method.to_ascii_uppercase();
            Method::from_bytes(method.as_bytes())
                .map_err(|_| BuildError::InvalidCorsMethod(method.clone()))?;
            allow_methods.insert(method);
        }

        let allow_headers: BTreeSet<String> = config
            .allow_headers
            .iter()
            .filter(|h| *h != "*")
            .map(|h| h.to_ascii_lowercase())
            .collect();

        let mut policy = Self {
            allow_all_origins,
            allow_origins: config.allow_origins.iter().cloned().collect(),
            origin_regex,
            allow_all_methods,
            allow_methods,
            allow_all_headers,
            allow_headers,
            allow_credentials: config.allow_credentials,
            expose_headers: config.expose_headers.iter().cloned().collect(),
            preflight_headers: Vec::new(),
        };
        policy.preflight_headers = policy.compute_preflight_headers(config);
        Ok(policy)
    }

    fn compute_preflight_headers(&self, config: &CorsConfig) -> Vec<(String, String)> {
        let mut headers = vec![(MAX_AGE.to_string(), config.max_age.to_string())];

        if self.allow_all_origins {
            headers.push((ALLOW_ORIGIN.to_string(), "*".to_string()));
        } else {
            headers.push(("Vary".to_string(), "Origin".to_string()));
        }

        if self.allow_credentials {
            headers.push((ALLOW_CREDENTIALS.to_string(), "true".to_string()));
        }

        if !self.allow_all_headers {
            let allowed: BTreeSet<String> = config
                .allow_headers
                .iter()
                .cloned()
                .chain(DEFAULT_ALLOWED_CORS_HEADERS.iter().map(|h| h.to_string()))
                .collect();
            headers.push((ALLOW_HEADERS.to_string(), join(allowed.iter())));
        }

        let methods = if self.allow_all_methods {
            join(STANDARD_METHODS.iter())
        } else {
            join(self.allow_methods.iter())
        };
        if !methods.is_empty() {
            headers.push((ALLOW_METHODS.to_string(), methods));
        }

        headers
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allow_all_origins
            || self.allow_origins.contains(origin)
            || self
                .origin_regex
                .as_ref()
                .is_some_and(|re| re.is_match(origin))
    }

    pub fn is_allow_all_methods(&self) -> bool {
        self.allow_all_methods
    }

    pub fn is_allow_all_headers(&self) -> bool {
        self.allow_all_headers
    }

    pub fn is_method_allowed(&self, method: &str) -> bool {
        self.allow_all_methods || self.allow_methods.contains(method)
    }

    /// Whether a requested header name is allowed (case-insensitive).
    pub fn is_header_allowed(&self, header: &str) -> bool {
        self.allow_all_headers || self.allow_headers.contains(&header.to_ascii_lowercase())
    }

    /// Default headers for a successful preflight.
    pub fn preflight_headers(&self) -> &[(String, String)] {
        &self.preflight_headers
    }

    /// Headers for a non-preflight response to `origin`; empty when the origin is not allowed.
    pub fn simple_headers(&self, origin: &str) -> Vec<(String, String)> {
        if !self.is_origin_allowed(origin) {
            return Vec::new();
        }
        let mut headers = Vec::new();
        if self.allow_all_origins {
            headers.push((ALLOW_ORIGIN.to_string(), "*".to_string()));
        } else {
            headers.push((ALLOW_ORIGIN.to_string(), origin.to_string()));
            headers.push(("Vary".to_string(), "Origin".to_string()));
        }
        if self.allow_credentials {
            headers.push((ALLOW_CREDENTIALS.to_string(), "true".to_string()));
        }
        if !self.expose_headers.is_empty() {
            headers.push((EXPOSE_HEADERS.to_string(), join(self.expose_headers.iter())));
        }
        headers
    }
}

/// Why a preflight was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    Method,
    Origin,
    Headers,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DenialReason::Method => "method",
            DenialReason::Origin => "Origin",
            DenialReason::Headers => "headers",
        })
    }
}

/// Result of negotiating an `OPTIONS` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightOutcome {
    /// Not a CORS preflight; answer with the route's `Allow` list.
    NoCors { allow: String },
    Allowed(Vec<(String, String)>),
    Denied(Vec<DenialReason>),
}

impl PreflightOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PreflightOutcome::NoCors { .. } => "no_cors",
            PreflightOutcome::Allowed(_) => "allowed",
            PreflightOutcome::Denied(_) => "denied",
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            PreflightOutcome::NoCors { allow } => Response::no_content().with_header("Allow", allow),
            PreflightOutcome::Allowed(headers) => headers
                .into_iter()
                .fold(Response::no_content(), |r, (k, v)| r.with_header(k, v)),
            PreflightOutcome::Denied(reasons) => Response::text(
                StatusCode::BAD_REQUEST,
                format!("Disallowed CORS {}", join(reasons.iter())),
            ),
        }
    }
}

/// Negotiate an `OPTIONS` request for a route declaring `route_methods`.
pub fn negotiate_preflight(
    policy: Option<&CorsPolicy>,
    headers: &HeaderMap,
    route_methods: &[Method],
) -> PreflightOutcome {
    let origin = header_str(headers, "origin");
    let (Some(policy), Some(origin)) = (policy, origin) else {
        let allow: BTreeSet<&str> = route_methods
            .iter()
            .map(Method::as_str)
            .chain(std::iter::once(Method::OPTIONS.as_str()))
            .collect();
        return PreflightOutcome::NoCors {
            allow: join(allow.iter()),
        };
    };

    let mut failures = Vec::new();

    if let Some(requested) = header_str(headers, REQUEST_METHOD) {
        if !policy.is_method_allowed(requested) {
            failures.push(DenialReason::Method);
        }
    }

    let mut response_headers = policy.preflight_headers().to_vec();

    if !policy.is_origin_allowed(origin) {
        failures.push(DenialReason::Origin);
    } else if get(&response_headers, ALLOW_ORIGIN) != Some("*") {
        set(&mut response_headers, ALLOW_ORIGIN, origin.to_string());
    }

    let requested_headers: Vec<&str> = header_str(headers, REQUEST_HEADERS)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .collect();

    if !requested_headers.is_empty() {
        if policy.is_allow_all_headers() {
            let union: BTreeSet<&str> = requested_headers
                .iter()
                .copied()
                .chain(DEFAULT_ALLOWED_CORS_HEADERS)
                .collect();
            set(&mut response_headers, ALLOW_HEADERS, join(union.iter()));
        } else if requested_headers.iter().any(|h| !policy.is_header_allowed(h)) {
            failures.push(DenialReason::Headers);
        }
    }

    if failures.is_empty() {
        PreflightOutcome::Allowed(response_headers)
    } else {
        PreflightOutcome::Denied(failures)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn get<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn set(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some((_, existing)) => *existing = value,
        None => headers.push((name.to_string(), value)),
    }
}

fn join<T: std::fmt::Display>(items: impl Iterator<Item = T>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    fn restricted() -> CorsPolicy {
        CorsPolicy::from_config(&CorsConfig {
            allow_origins: vec!["https://app.example".into()],
            allow_methods: vec!["GET".into(), "post".into()],
            allow_headers: vec!["X-Token".into()],
            ..CorsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_no_origin_lists_allowed_methods() {
        let policy = CorsPolicy::from_config(&CorsConfig::default()).unwrap();
        let methods = [Method::POST, Method::GET];
        for policy in [None, Some(&policy)] {
            let outcome = negotiate_preflight(policy, &HeaderMap::new(), &methods);
            assert_eq!(
                outcome,
                PreflightOutcome::NoCors {
                    allow: "GET, OPTIONS, POST".into()
                }
            );
        }
    }

    #[test]
    fn test_disallowed_method() {
        let outcome = negotiate_preflight(
            Some(&restricted()),
            &headers(&[
                ("origin", "https://app.example"),
                ("access-control-request-method", "DELETE"),
            ]),
            &[Method::GET],
        );
        assert_eq!(outcome, PreflightOutcome::Denied(vec![DenialReason::Method]));
        let response = outcome.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(&response.body()[..], b"Disallowed CORS method");
    }

    #[test]
    fn test_reasons_accumulate_in_order() {
        let outcome = negotiate_preflight(
            Some(&restricted()),
            &headers(&[
                ("origin", "https://evil.example"),
                ("access-control-request-method", "PUT"),
                ("access-control-request-headers", "x-token, X-Other"),
            ]),
            &[Method::GET],
        );
        let response = outcome.into_response();
        assert_eq!(&response.body()[..], b"Disallowed CORS method, Origin, headers");
    }

    #[test]
    fn test_origin_echo_vs_wildcard() {
        let outcome = negotiate_preflight(
            Some(&restricted()),
            &headers(&[("origin", "https://app.example")]),
            &[Method::GET],
        );
        let PreflightOutcome::Allowed(h) = outcome else {
            panic!("expected allowed");
        };
        assert_eq!(get(&h, ALLOW_ORIGIN), Some("https://app.example"));
        assert_eq!(get(&h, "Vary"), Some("Origin"));

        let open = CorsPolicy::from_config(&CorsConfig::default()).unwrap();
        let outcome = negotiate_preflight(
            Some(&open),
            &headers(&[("origin", "https://app.example")]),
            &[Method::GET],
        );
        let PreflightOutcome::Allowed(h) = outcome else {
            panic!("expected allowed");
        };
        assert_eq!(get(&h, ALLOW_ORIGIN), Some("*"));
    }

    #[test]
    fn test_allow_all_headers_unions_defaults() {
        let open = CorsPolicy::from_config(&CorsConfig::default()).unwrap();
        let outcome = negotiate_preflight(
            Some(&open),
            &headers(&[
                ("origin", "https://app.example"),
                ("access-control-request-headers", " X-Trace , ,Accept"),
            ]),
            &[Method::GET],
        );
        let PreflightOutcome::Allowed(h) = outcome else {
            panic!("expected allowed");
        };
        assert_eq!(
            get(&h, ALLOW_HEADERS),
            Some("Accept, Accept-Language, Content-Language, Content-Type, X-Trace")
        );
    }

    #[test]
    fn test_restricted_headers_case_insensitive() {
        let outcome = negotiate_preflight(
            Some(&restricted()),
            &headers(&[
                ("origin", "https://app.example"),
                ("access-control-request-headers", "X-TOKEN"),
            ]),
            &[Method::GET],
        );
        assert!(matches!(outcome, PreflightOutcome::Allowed(_)));
    }

    #[test]
    fn test_shared_preflight_headers_not_mutated() {
        let policy = restricted();
        let before = policy.preflight_headers().to_vec();
        let _ = negotiate_preflight(
            Some(&policy),
            &headers(&[("origin", "https://app.example")]),
            &[Method::GET],
        );
        assert_eq!(policy.preflight_headers(), &before[..]);
        assert_eq!(get(&before, ALLOW_METHODS), Some("GET, POST"));
        assert_eq!(
            get(&before, ALLOW_HEADERS),
            Some("Accept, Accept-Language, Content-Language, Content-Type, X-Token")
        );
    }

    #[test]
    fn test_origin_regex() {
        let policy = CorsPolicy::from_config(&CorsConfig {
            allow_origins: vec![],
            allow_origin_regex: Some(r"https://.*\.example\.com".into()),
            ..CorsConfig::default()
        })
        .unwrap();
        assert!(policy.is_origin_allowed("https://a.example.com"));
        assert!(!policy.is_origin_allowed("https://a.example.com.evil"));
    }

    #[test]
    fn test_simple_headers() {
        let policy = restricted();
        assert!(policy.simple_headers("https://evil.example").is_empty());
        let h = policy.simple_headers("https://app.example");
        assert_eq!(get(&h, ALLOW_ORIGIN), Some("https://app.example"));
    }
}
