//! Path lookup across every registered route.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Resolve a request path to a route plus captured path parameters
//! - Return an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) lookup for static paths via HashMap
//! - O(n) scan of parameterized paths, most specific first

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::BuildError;
use crate::routing::matcher::{normalize, PathPattern};
use crate::routing::route::HttpRoute;

#[derive(Debug, Default)]
pub struct Router {
    static_routes: HashMap<String, Arc<HttpRoute>>,
    dynamic_routes: Vec<Arc<HttpRoute>>,
}

impl Router {
    pub fn build(routes: impl IntoIterator<Item = HttpRoute>) -> Result<Self, BuildError> {
        let mut router = Router::default();
        let mut seen: Vec<PathPattern> = Vec::new();

        for route in routes {
            if seen.contains(route.pattern()) {
                return Err(BuildError::DuplicatePath(route.path().to_string()));
            }
            seen.push(route.pattern().clone());

            let route = Arc::new(route);
            if route.pattern().is_static() {
                router.static_routes.insert(route.path().to_string(), route);
            } else {
                router.dynamic_routes.push(route);
            }
        }

        // stable: equal specificity keeps registration order
        router
            .dynamic_routes
            .sort_by_key(|r| std::cmp::Reverse(r.pattern().specificity()));
        Ok(router)
    }

    /// Find the route serving `path`.
    pub fn resolve(&self, path: &str) -> Option<(Arc<HttpRoute>, HashMap<String, String>)> {
        if let Some(route) = self.static_routes.get(normalize(path)) {
            return Some((route.clone(), HashMap::new()));
        }
        self.dynamic_routes
            .iter()
            .find_map(|route| route.pattern().matches(path).map(|params| (route.clone(), params)))
    }

    pub fn routes(&self) -> impl Iterator<Item = &Arc<HttpRoute>> {
        self.static_routes.values().chain(self.dynamic_routes.iter())
    }

    pub fn len(&self) -> usize {
        self.static_routes.len() + self.dynamic_routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
