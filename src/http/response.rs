//! Response model and its conversion to wire messages.
//!
//! # Responsibilities
//! - Hold status, headers, media type and a buffered body
//! - Encode into a `Start` + `Body` message pair for the transport
//!
//! # Design Decisions
//! - Header names keep their given case; lookups are case-insensitive
//! - `Content-Type`/`Content-Length` are derived at encoding time, never stored twice
//! - Bodyless statuses (1xx, 204, 304) never carry a body or content headers

use axum::http::StatusCode;
use bytes::Bytes;

use crate::http::message::{send_messages, Sender, TransportError, WireMessage};

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const APPLICATION_JSON: &str = "application/json";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(String, String)>,
    media_type: Option<String>,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            media_type: None,
            body: Bytes::new(),
        }
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::bytes(status, body, TEXT_PLAIN)
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::bytes(status, value.to_string(), APPLICATION_JSON)
    }

    pub fn bytes(status: StatusCode, body: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            media_type: Some(media_type.into()),
            body: body.into(),
        }
    }

    /// Append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace every header with this name by a single value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    fn allows_body(&self) -> bool {
        !(self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED)
    }

    /// Encode as the messages a transport sends.
    pub fn into_messages(self) -> Vec<WireMessage> {
        let allows_body = self.allows_body();
        let mut headers = self.headers;
        let body = if allows_body { self.body } else { Bytes::new() };

        if allows_body {
            if let Some(media_type) = self.media_type {
                if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                    headers.push(("content-type".to_string(), media_type));
                }
            }
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case("content-length"));
            headers.push(("content-length".to_string(), body.len().to_string()));
        }

        vec![
            WireMessage::Start {
                status: self.status.as_u16(),
                headers,
            },
            WireMessage::Body {
                body,
                more_body: false,
            },
        ]
    }

    pub async fn send(self, sender: &dyn Sender) -> Result<(), TransportError> {
        send_messages(&self.into_messages(), sender).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_response_messages() {
        let messages = Response::text(StatusCode::BAD_REQUEST, "Disallowed CORS method").into_messages();
        match &messages[0] {
            WireMessage::Start { status, headers } => {
                assert_eq!(*status, 400);
                assert!(headers.contains(&("content-type".into(), TEXT_PLAIN.into())));
                assert!(headers.contains(&("content-length".into(), "22".into())));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            messages[1],
            WireMessage::Body {
                body: Bytes::from("Disallowed CORS method"),
                more_body: false
            }
        );
    }

    #[test]
    fn test_no_content_drops_body_headers() {
        let messages = Response::no_content()
            .with_header("Allow", "GET, OPTIONS")
            .with_media_type(TEXT_PLAIN)
            .into_messages();
        match &messages[0] {
            WireMessage::Start { status, headers } => {
                assert_eq!(*status, 204);
                assert_eq!(headers, &vec![("Allow".to_string(), "GET, OPTIONS".to_string())]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_header_is_case_insensitive() {
        let mut response = Response::no_content().with_header("Vary", "Origin");
        response.set_header("vary", "Accept");
        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.header("VARY"), Some("Accept"));
    }
}
