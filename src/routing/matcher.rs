//! Path pattern compilation and matching.
//!
//! # Responsibilities
//! - Compile a registered path such as `/items/{id}` into segments
//! - Match a request path and capture named parameters
//!
//! # Design Decisions
//! - Segment based; no regex in the hot path
//! - Matching is case-sensitive
//! - A trailing slash is ignored on both sides (except for `/` itself)

use std::collections::HashMap;

use crate::error::BuildError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

/// A compiled route path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    path: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(path: &str) -> Result<Self, BuildError> {
        let invalid = |reason: &str| BuildError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        if !path.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let normalized = normalize(path);
        let mut segments = Vec::new();
        let mut names = Vec::new();
        for raw in split(normalized) {
            let segment = match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some("") => return Err(invalid("empty parameter name")),
                Some(name) if names.contains(&name) => {
                    return Err(invalid("duplicate parameter name"));
                }
                Some(name) => {
                    names.push(name);
                    Segment::Param(name.to_string())
                }
                None if raw.contains(['{', '}']) => return Err(invalid("unbalanced braces")),
                None => Segment::Static(raw.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            path: normalized.to_string(),
            segments,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// True when the pattern has no parameters.
    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Static(_)))
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Static(_) => None,
        })
    }

    /// Number of static segments; more specific patterns are tried first.
    pub fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Static(_)))
            .count()
    }

    /// Match `path`, returning the captured parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split(normalize(path));
        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Static(expected) if expected != part => return None,
                Segment::Static(_) => {}
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

pub(crate) fn normalize(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some("") | None => path,
        Some(trimmed) => trimmed,
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').skip(1).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_pattern() {
        let pattern = PathPattern::parse("/health/").unwrap();
        assert!(pattern.is_static());
        assert_eq!(pattern.path(), "/health");
        assert!(pattern.matches("/health").is_some());
        assert!(pattern.matches("/health/").is_some());
        assert!(pattern.matches("/Health").is_none());
        assert!(pattern.matches("/health/extra").is_none());
    }

    #[test]
    fn test_param_capture() {
        let pattern = PathPattern::parse("/users/{user_id}/orders/{order_id}").unwrap();
        assert_eq!(pattern.specificity(), 2);
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["user_id", "order_id"]);

        let params = pattern.matches("/users/7/orders/42").unwrap();
        assert_eq!(params["user_id"], "7");
        assert_eq!(params["order_id"], "42");
        assert!(pattern.matches("/users/7/orders").is_none());
    }

    #[test]
    fn test_root() {
        let pattern = PathPattern::parse("/").unwrap();
        assert!(pattern.matches("/").unwrap().is_empty());
        assert!(pattern.matches("/a").is_none());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::parse("items").is_err());
        assert!(PathPattern::parse("/items/{}").is_err());
        assert!(PathPattern::parse("/items/{id}/{id}").is_err());
        assert!(PathPattern::parse("/items/{id").is_err());
    }
}
