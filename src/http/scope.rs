//! Connection scope handed to the application by a transport.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::http::{HeaderMap, Method};
use uuid::Uuid;

use crate::http::form::UploadFile;

/// Everything known about a request before its body is read.
#[derive(Debug, Clone)]
pub struct Scope {
    pub method: Method,
    pub path: String,
    pub query_string: String,
    pub headers: HeaderMap,
    /// Filled by the router once the path has been matched.
    pub path_params: HashMap<String, String>,
    pub client: Option<SocketAddr>,
    pub request_id: String,
    pub state: Arc<ScopeState>,
}

impl Scope {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query_string: String::new(),
            headers: HeaderMap::new(),
            path_params: HashMap::new(),
            client: None,
            request_id: Uuid::new_v4().to_string(),
            state: Arc::new(ScopeState::default()),
        }
    }

    /// Split a request target such as `/items?limit=3` into path and query.
    pub fn from_target(method: Method, target: &str) -> Self {
        match target.split_once('?') {
            Some((path, query)) => Self::new(method, path).with_query(query),
            None => Self::new(method, target),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_client(mut self, client: SocketAddr) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Request-scoped mutable state, shared between the dispatcher and the application.
#[derive(Debug, Default)]
pub struct ScopeState {
    is_cached: AtomicBool,
    uploads: Mutex<Vec<Arc<UploadFile>>>,
}

impl ScopeState {
    /// Whether the response was replayed from the response cache.
    pub fn is_cached(&self) -> bool {
        self.is_cached.load(Ordering::Acquire)
    }

    pub(crate) fn mark_cached(&self) {
        self.is_cached.store(true, Ordering::Release);
    }

    pub(crate) fn register_upload(&self, upload: Arc<UploadFile>) {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(upload);
    }

    /// Uploads created while parsing this request's form data.
    pub fn uploads(&self) -> Vec<Arc<UploadFile>> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close every upload the handler left open. Returns how many were closed.
    pub async fn close_uploads(&self) -> usize {
        let mut closed = 0;
        for upload in self.uploads() {
            if upload.close().await {
                closed += 1;
            }
        }
        closed
    }
}
