//! Typed request handed to guards, hooks, dependency providers and handlers.
//!
//! # Responsibilities
//! - Expose scope data (method, path, query, headers, cookies, path params)
//! - Read the body from the transport once and memoize it
//! - Decode JSON and form bodies, registering uploads with the scope state
//!
//! # Design Decisions
//! - Cheap to clone (`Arc` inside) so async handlers and hooks can own it
//! - Body size is enforced while reading, before the whole body is buffered
//! - Decode failures are `SerializationError`s; the caller decides their status

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use axum::http::{HeaderMap, Method};
use bytes::{Bytes, BytesMut};
use tokio::sync::OnceCell;

use crate::app::AppContext;
use crate::error::{DispatchError, SerializationError};
use crate::http::form::{parse_content_header, parse_multipart, parse_urlencoded, FormData, FormValue};
use crate::http::message::{ReceiveEvent, Receiver, TransportError};
use crate::http::scope::{Scope, ScopeState};

#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    scope: Scope,
    receiver: Arc<dyn Receiver>,
    context: Arc<AppContext>,
    handler_name: String,
    query: OnceLock<Vec<(String, String)>>,
    body: OnceCell<Bytes>,
    json: OnceCell<serde_json::Value>,
    form: OnceCell<FormData>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.inner.scope.method)
            .field("path", &self.inner.scope.path)
            .field("request_id", &self.inner.scope.request_id)
            .field("handler", &self.inner.handler_name)
            .finish()
    }
}

impl Request {
    /// Bind a scope to the handler that will serve it.
    pub fn new(
        scope: Scope,
        receiver: Arc<dyn Receiver>,
        context: Arc<AppContext>,
        handler_name: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                scope,
                receiver,
                context,
                handler_name: handler_name.into(),
                query: OnceLock::new(),
                body: OnceCell::new(),
                json: OnceCell::new(),
                form: OnceCell::new(),
            }),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn method(&self) -> &Method {
        &self.inner.scope.method
    }

    pub fn path(&self) -> &str {
        &self.inner.scope.path
    }

    pub fn query_string(&self) -> &str {
        &self.inner.scope.query_string
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.scope.headers
    }

    /// Header value as text, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .scope
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
    }

    /// Decoded query parameters in their original order.
    pub fn query_params(&self) -> &[(String, String)] {
        self.inner.query.get_or_init(|| {
            url::form_urlencoded::parse(self.inner.scope.query_string.as_bytes())
                .into_owned()
                .collect()
        })
    }

    /// First value of a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.inner
            .scope
            .headers
            .get_all("cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| k.trim() == name)
            .map(|(_, v)| v.trim())
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.inner.scope.path_params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.inner.scope.path_params
    }

    pub fn request_id(&self) -> &str {
        &self.inner.scope.request_id
    }

    pub fn client(&self) -> Option<SocketAddr> {
        self.inner.scope.client
    }

    pub fn state(&self) -> &Arc<ScopeState> {
        &self.inner.scope.state
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.inner.context
    }

    /// Name of the handler this request was bound to.
    pub fn handler_name(&self) -> &str {
        &self.inner.handler_name
    }

    /// Parsed `Content-Type` header.
    pub fn content_type(&self) -> (String, HashMap<String, String>) {
        parse_content_header(self.header("content-type").unwrap_or_default())
    }

    /// The full request body.
    pub async fn body(&self) -> Result<Bytes, DispatchError> {
        self.inner
            .body
            .get_or_try_init(|| self.read_body())
            .await
            .cloned()
    }

    async fn read_body(&self) -> Result<Bytes, DispatchError> {
        let limit = self.inner.context.limits.max_body_size;
        let mut buf = BytesMut::new();
        loop {
            let event = match self.inner.receiver.receive().await {
                Err(TransportError::LengthLimit) => {
                    return Err(DispatchError::PayloadTooLarge { limit });
                }
                other => other?,
            };
            match event {
                ReceiveEvent::Body { body, more_body } => {
                    if buf.len() + body.len() > limit {
                        return Err(DispatchError::PayloadTooLarge { limit });
                    }
                    buf.extend_from_slice(&body);
                    if !more_body {
                        break;
                    }
                }
                ReceiveEvent::Disconnect => {
                    return Err(DispatchError::Internal(
                        "client disconnected prematurely".into(),
                    ));
                }
            }
        }
        Ok(buf.freeze())
    }

    /// The body decoded as JSON. An empty body decodes to `null`.
    pub async fn json(&self) -> Result<serde_json::Value, DispatchError> {
        self.inner
            .json
            .get_or_try_init(|| async {
                let body = self.body().await?;
                if body.is_empty() {
                    return Ok(serde_json::Value::Null);
                }
                serde_json::from_slice(&body)
                    .map_err(|e| DispatchError::Serialization(SerializationError::from(e)))
            })
            .await
            .cloned()
    }

    /// The body decoded as a form.
    ///
    /// Non-form content types yield an empty form.
    pub async fn form(&self) -> Result<FormData, DispatchError> {
        self.inner
            .form
            .get_or_try_init(|| self.read_form())
            .await
            .cloned()
    }

    async fn read_form(&self) -> Result<FormData, DispatchError> {
        let (content_type, options) = self.content_type();
        match content_type.as_str() {
            "multipart/form-data" => {
                let body = self.body().await?;
                let limits = &self.inner.context.limits;
                let boundary = options.get("boundary").map(String::as_str).unwrap_or_default();
                let parts = parse_multipart(&body, boundary, limits.multipart_part_limit)?;
                let form = FormData::from_parts(parts, limits.upload_dir.clone()).await?;
                for (_, value) in form.iter() {
                    if let FormValue::File(upload) = value {
                        self.state().register_upload(upload.clone());
                    }
                }
                Ok(form)
            }
            "application/x-www-form-urlencoded" => {
                let body = self.body().await?;
                Ok(parse_urlencoded(&body))
            }
            _ => Ok(FormData::new()),
        }
    }

    /// Close uploads the handler did not close itself.
    pub async fn close_uploads(&self) -> usize {
        self.state().close_uploads().await
    }
}
