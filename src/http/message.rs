//! Wire messages and the transport contract.
//!
//! # Responsibilities
//! - Define the two response units (`Start`, `Body`) exchanged with a transport
//! - Define the `Receiver` / `Sender` primitives a transport exposes
//! - Provide buffered in-memory implementations used by the server adapter and tests
//!
//! # Design Decisions
//! - Messages are plain data; serde gives them ASGI-style `type` tags for logs and tooling
//! - Transport traits take `&self`; implementations own their interior mutability

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One unit of the response protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "http.response.start")]
    Start {
        status: u16,
        headers: Vec<(String, String)>,
    },
    #[serde(rename = "http.response.body")]
    Body {
        body: Bytes,
        #[serde(default)]
        more_body: bool,
    },
}

impl WireMessage {
    pub fn status(&self) -> Option<u16> {
        match self {
            WireMessage::Start { status, .. } => Some(*status),
            WireMessage::Body { .. } => None,
        }
    }
}

/// One unit of the request protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    Body { body: Bytes, more_body: bool },
    Disconnect,
}

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("client disconnected")]
    Disconnected,

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("request body exceeds the transport length limit")]
    LengthLimit,

    #[error("response already started")]
    AlreadyStarted,

    #[error("response body sent before response start")]
    NotStarted,
}

/// Source of inbound request events.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn receive(&self) -> Result<ReceiveEvent, TransportError>;
}

/// Sink for outbound response messages.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, message: WireMessage) -> Result<(), TransportError>;
}

/// Send every message in order.
pub async fn send_messages(
    messages: &[WireMessage],
    sender: &dyn Sender,
) -> Result<(), TransportError> {
    for message in messages {
        sender.send(message.clone()).await?;
    }
    Ok(())
}

/// Receiver replaying a fixed list of body chunks.
#[derive(Debug, Default)]
pub struct BufferedReceiver {
    events: Mutex<VecDeque<ReceiveEvent>>,
}

impl BufferedReceiver {
    /// A receiver yielding `body` as a single final chunk.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self::chunked(vec![body.into()])
    }

    /// A receiver yielding each chunk in order; the last one ends the body.
    pub fn chunked(chunks: Vec<Bytes>) -> Self {
        let total = chunks.len();
        let events = chunks
            .into_iter()
            .enumerate()
            .map(|(i, body)| ReceiveEvent::Body {
                body,
                more_body: i + 1 < total,
            })
            .collect();
        Self {
            events: Mutex::new(events),
        }
    }

    /// A receiver whose client goes away after the given chunks.
    pub fn disconnecting(chunks: Vec<Bytes>) -> Self {
        let mut events: VecDeque<ReceiveEvent> = chunks
            .into_iter()
            .map(|body| ReceiveEvent::Body {
                body,
                more_body: true,
            })
            .collect();
        events.push_back(ReceiveEvent::Disconnect);
        Self {
            events: Mutex::new(events),
        }
    }
}

#[async_trait]
impl Receiver for BufferedReceiver {
    async fn receive(&self) -> Result<ReceiveEvent, TransportError> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(events.pop_front().unwrap_or(ReceiveEvent::Body {
            body: Bytes::new(),
            more_body: false,
        }))
    }
}

/// Sender that records every message it is given.
#[derive(Debug, Default)]
pub struct BufferedSender {
    messages: Mutex<Vec<WireMessage>>,
}

impl BufferedSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<WireMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn into_messages(self) -> Vec<WireMessage> {
        self.messages
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Sender for BufferedSender {
    async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let started = messages.iter().any(|m| m.status().is_some());
        match (&message, started) {
            (WireMessage::Start { .. }, true) => return Err(TransportError::AlreadyStarted),
            (WireMessage::Body { .. }, false) => return Err(TransportError::NotStarted),
            _ => {}
        }
        messages.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunked_receiver_marks_last_chunk() {
        let receiver = BufferedReceiver::chunked(vec![Bytes::from("a"), Bytes::from("b")]);
        assert_eq!(
            receiver.receive().await.unwrap(),
            ReceiveEvent::Body {
                body: Bytes::from("a"),
                more_body: true
            }
        );
        assert_eq!(
            receiver.receive().await.unwrap(),
            ReceiveEvent::Body {
                body: Bytes::from("b"),
                more_body: false
            }
        );
    }

    #[tokio::test]
    async fn test_sender_enforces_message_order() {
        let sender = BufferedSender::new();
        let body = WireMessage::Body {
            body: Bytes::from("x"),
            more_body: false,
        };
        assert!(matches!(
            sender.send(body.clone()).await,
            Err(TransportError::NotStarted)
        ));

        let start = WireMessage::Start {
            status: 200,
            headers: Vec::new(),
        };
        sender.send(start.clone()).await.unwrap();
        sender.send(body).await.unwrap();
        assert!(matches!(
            sender.send(start).await,
            Err(TransportError::AlreadyStarted)
        ));
        assert_eq!(sender.messages().len(), 2);
    }

    #[test]
    fn test_message_serde_tags() {
        let json = serde_json::to_value(WireMessage::Start {
            status: 204,
            headers: vec![("allow".into(), "GET".into())],
        })
        .unwrap();
        assert_eq!(json["type"], "http.response.start");
        assert_eq!(json["status"], 204);
    }
}
