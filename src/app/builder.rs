//! Application assembly.

use std::sync::Arc;

use crate::app::context::AppContext;
use crate::app::exceptions::{DefaultExceptionHandler, ExceptionHandler};
use crate::app::App;
use crate::cache::{MemoryStore, ResponseCache, Store};
use crate::config::AppConfig;
use crate::error::BuildError;
use crate::handlers::Handler;
use crate::routing::matcher::normalize;
use crate::routing::{HttpRoute, Router};

/// Collects handlers and settings, then compiles them into an immutable [`App`].
#[derive(Default)]
pub struct AppBuilder {
    config: AppConfig,
    // (path, handlers) in registration order
    routes: Vec<(String, Vec<Arc<Handler>>)>,
    store: Option<Arc<dyn Store>>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Register `handler` on `path`. Handlers sharing a path form one route.
    pub fn route(mut self, path: &str, handler: Handler) -> Self {
        let handler = Arc::new(handler);
        match self
            .routes
            .iter_mut()
            .find(|(existing, _)| normalize(existing) == normalize(path))
        {
            Some((_, handlers)) => handlers.push(handler),
            None => self.routes.push((path.to_string(), vec![handler])),
        }
        self
    }

    /// Backing store for the response cache (in-memory by default).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let store: Arc<dyn Store> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let response_cache = ResponseCache::new(store, &self.config.response_cache);
        let context = AppContext::from_config(&self.config, response_cache)?;

        let routes = self
            .routes
            .into_iter()
            .map(|(path, handlers)| HttpRoute::new(&path, handlers))
            .collect::<Result<Vec<_>, _>>()?;
        let router = Router::build(routes)?;

        let exception_handler: Arc<dyn ExceptionHandler> = match self.exception_handler {
            Some(handler) => handler,
            None => Arc::new(DefaultExceptionHandler),
        };

        tracing::info!(
            routes = router.len(),
            cors = context.cors.is_some(),
            "Application built"
        );

        Ok(App {
            router,
            context: Arc::new(context),
            exception_handler,
            config: self.config,
        })
    }
}
