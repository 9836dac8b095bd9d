//! Method → handler table for a single path.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::Method;

use crate::error::BuildError;
use crate::handlers::Handler;

/// Maps each HTTP method of a route to exactly one handler.
///
/// Built once and immutable afterwards.
#[derive(Debug, Clone)]
pub struct RouteMethodTable {
    handlers: BTreeMap<String, Arc<Handler>>,
}

impl RouteMethodTable {
    /// Build the table. A method claimed twice fails the whole build.
    pub fn build(
        path: &str,
        handlers: impl IntoIterator<Item = Arc<Handler>>,
    ) -> Result<Self, BuildError> {
        let mut table = BTreeMap::new();
        for handler in handlers {
            for method in handler.methods() {
                if table.contains_key(method.as_str()) {
                    return Err(BuildError::DuplicateRegistration {
                        path: path.to_string(),
                        method: method.clone(),
                    });
                }
                table.insert(method.as_str().to_string(), handler.clone());
            }
        }
        Ok(Self { handlers: table })
    }

    pub fn lookup(&self, method: &Method) -> Option<&Arc<Handler>> {
        self.handlers.get(method.as_str())
    }

    pub fn contains(&self, method: &Method) -> bool {
        self.handlers.contains_key(method.as_str())
    }

    /// Registered methods, sorted.
    pub fn methods(&self) -> Vec<Method> {
        self.handlers
            .keys()
            .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
            .collect()
    }

    /// Distinct handlers, in method order.
    pub fn handlers(&self) -> Vec<Arc<Handler>> {
        let mut seen: Vec<Arc<Handler>> = Vec::new();
        for handler in self.handlers.values() {
            if !seen.iter().any(|h| Arc::ptr_eq(h, handler)) {
                seen.push(handler.clone());
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;

    fn handler(name: &str, methods: &[Method]) -> Arc<Handler> {
        Arc::new(
            Handler::builder(name)
                .methods(methods.iter().cloned())
                .to_sync(|_, _| Ok::<_, DispatchError>(()))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_one_entry_per_method() {
        let table = RouteMethodTable::build(
            "/items",
            [
                handler("list", &[Method::GET]),
                handler("write", &[Method::POST, Method::PUT]),
            ],
        )
        .unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.methods(), vec![Method::GET, Method::POST, Method::PUT]);
        assert_eq!(table.lookup(&Method::PUT).unwrap().name(), "write");
        assert!(table.lookup(&Method::DELETE).is_none());
        assert_eq!(table.handlers().len(), 2);
    }

    #[test]
    fn test_duplicate_method_fails() {
        let err = RouteMethodTable::build(
            "/items",
            [
                handler("a", &[Method::GET]),
                handler("b", &[Method::POST, Method::GET]),
            ],
        )
        .unwrap_err();

        match err {
            BuildError::DuplicateRegistration { path, method } => {
                assert_eq!(path, "/items");
                assert_eq!(method, Method::GET);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
