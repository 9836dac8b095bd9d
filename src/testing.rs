//! In-memory transport for driving an [`App`] without sockets.
//!
//! ```ignore
//! let client = TestClient::new(app);
//! let response = client.get("/items?limit=2").header("origin", "https://a.example").send().await?;
//! assert_eq!(response.status(), StatusCode::OK);
//! ```

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::{Bytes, BytesMut};

use crate::app::App;
use crate::http::message::{BufferedReceiver, BufferedSender, TransportError, WireMessage};
use crate::http::scope::{Scope, ScopeState};

const MULTIPART_BOUNDARY: &str = "route-dispatch-test-boundary";

#[derive(Debug, Clone)]
pub struct TestClient {
    app: Arc<App>,
}

impl TestClient {
    pub fn new(app: App) -> Self {
        Self { app: Arc::new(app) }
    }

    pub fn from_shared(app: Arc<App>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    /// Start a request. `target` may carry a query string.
    pub fn request(&self, method: Method, target: &str) -> TestRequest {
        TestRequest {
            app: self.app.clone(),
            scope: Scope::from_target(method, target),
            body: Body::Empty,
            disconnect: false,
        }
    }

    pub fn get(&self, target: &str) -> TestRequest {
        self.request(Method::GET, target)
    }

    pub fn post(&self, target: &str) -> TestRequest {
        self.request(Method::POST, target)
    }

    pub fn put(&self, target: &str) -> TestRequest {
        self.request(Method::PUT, target)
    }

    pub fn patch(&self, target: &str) -> TestRequest {
        self.request(Method::PATCH, target)
    }

    pub fn delete(&self, target: &str) -> TestRequest {
        self.request(Method::DELETE, target)
    }

    pub fn options(&self, target: &str) -> TestRequest {
        self.request(Method::OPTIONS, target)
    }
}

#[derive(Debug)]
enum Body {
    Empty,
    Chunks(Vec<Bytes>),
    Multipart(Vec<MultipartField>),
}

#[derive(Debug)]
struct MultipartField {
    name: String,
    file: Option<(String, String)>,
    content: Bytes,
}

/// A request under construction.
#[derive(Debug)]
pub struct TestRequest {
    app: Arc<App>,
    scope: Scope,
    body: Body,
    disconnect: bool,
}

impl TestRequest {
    /// Append a header. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.scope.headers.append(name, value);
        }
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.scope.headers.extend(headers);
        self
    }

    pub fn request_id(mut self, request_id: &str) -> Self {
        self.scope.request_id = request_id.to_string();
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Chunks(vec![body.into()]);
        self
    }

    /// Deliver the body in several receive events.
    pub fn chunks(mut self, chunks: Vec<Bytes>) -> Self {
        self.body = Body::Chunks(chunks);
        self
    }

    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }

    pub fn form(self, fields: &[(&str, &str)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.header("content-type", "application/x-www-form-urlencoded")
            .body(encoded)
    }

    /// Add a plain multipart field.
    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.push_field(MultipartField {
            name: name.to_string(),
            file: None,
            content: Bytes::copy_from_slice(value.as_bytes()),
        });
        self
    }

    /// Add a multipart file field.
    pub fn file(mut self, name: &str, filename: &str, content_type: &str, content: impl Into<Bytes>) -> Self {
        self.push_field(MultipartField {
            name: name.to_string(),
            file: Some((filename.to_string(), content_type.to_string())),
            content: content.into(),
        });
        self
    }

    fn push_field(&mut self, field: MultipartField) {
        match &mut self.body {
            Body::Multipart(fields) => fields.push(field),
            body => *body = Body::Multipart(vec![field]),
        }
    }

    /// Simulate the client going away after the body chunks.
    pub fn disconnect(mut self) -> Self {
        self.disconnect = true;
        self
    }

    pub async fn send(self) -> Result<TestResponse, TransportError> {
        let mut scope = self.scope;
        let chunks = match self.body {
            Body::Empty => Vec::new(),
            Body::Chunks(chunks) => chunks,
            Body::Multipart(fields) => {
                if let Ok(value) = HeaderValue::from_str(&format!(
                    "multipart/form-data; boundary={MULTIPART_BOUNDARY}"
                )) {
                    scope.headers.insert("content-type", value);
                }
                vec![encode_multipart(&fields)]
            }
        };
        let receiver = if self.disconnect {
            BufferedReceiver::disconnecting(chunks)
        } else if chunks.is_empty() {
            BufferedReceiver::default()
        } else {
            BufferedReceiver::chunked(chunks)
        };

        let state = scope.state.clone();
        let sender = BufferedSender::new();
        self.app.handle(scope, Arc::new(receiver), &sender).await?;
        Ok(TestResponse::from_messages(sender.into_messages(), state))
    }
}

fn encode_multipart(fields: &[MultipartField]) -> Bytes {
    let mut body = BytesMut::new();
    for field in fields {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        match &field.file {
            Some((filename, content_type)) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        field.name, filename, content_type
                    )
                    .as_bytes(),
                );
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field.name).as_bytes(),
                );
            }
        }
        body.extend_from_slice(&field.content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body.freeze()
}

/// The messages an app sent, decoded.
#[derive(Debug)]
pub struct TestResponse {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Bytes,
    messages: Vec<WireMessage>,
    state: Arc<ScopeState>,
}

impl TestResponse {
    fn from_messages(messages: Vec<WireMessage>, state: Arc<ScopeState>) -> Self {
        let mut status = StatusCode::INTERNAL_SERVER_ERROR;
        let mut headers = Vec::new();
        let mut body = BytesMut::new();
        for message in &messages {
            match message {
                WireMessage::Start { status: code, headers: h } => {
                    status = StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    headers = h.clone();
                }
                WireMessage::Body { body: chunk, .. } => body.extend_from_slice(chunk),
            }
        }
        Self {
            status,
            headers,
            body: body.freeze(),
            messages,
            state,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// First header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Raw wire messages, as the transport received them.
    pub fn messages(&self) -> &[WireMessage] {
        &self.messages
    }

    /// Whether the response was replayed from the response cache.
    pub fn is_cached(&self) -> bool {
        self.state.is_cached()
    }

    /// Request-scoped state, e.g. to inspect uploads after the request.
    pub fn state(&self) -> &Arc<ScopeState> {
        &self.state
    }
}
