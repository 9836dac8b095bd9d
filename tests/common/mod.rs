//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use route_dispatch::config::CorsConfig;
use route_dispatch::dependency::{Dependency, Provided};
use route_dispatch::error::BoxError;
use route_dispatch::handlers::HandlerBuilder;
use route_dispatch::http::{Sender, TransportError, WireMessage};
use route_dispatch::{App, DispatchError, Handler, HttpServer, Shutdown};
use tokio::net::TcpListener;

/// Ordered record of events shared between handlers, hooks and the test.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

/// A dependency that logs `acquire:<key>` and `release:<key>`.
pub fn tracked_dependency(key: &str, log: &EventLog) -> Dependency {
    tracked_dependency_with(key, log, false)
}

/// Like [`tracked_dependency`], but the release itself can fail.
pub fn tracked_dependency_with(key: &str, log: &EventLog, fail_release: bool) -> Dependency {
    let log = log.clone();
    let name = key.to_string();
    Dependency::new(key, move |_, _| {
        let log = log.clone();
        let name = name.clone();
        async move {
            log.push(format!("acquire:{name}"));
            let release_log = log.clone();
            let release_name = name.clone();
            Ok::<_, DispatchError>(Provided::with_release(name.clone(), move || async move {
                release_log.push(format!("release:{release_name}"));
                if fail_release {
                    Err::<(), BoxError>(format!("{release_name} release failed").into())
                } else {
                    Ok(())
                }
            }))
        }
    })
}

/// A dependency whose provider fails after a short delay.
pub fn failing_dependency(key: &str) -> Dependency {
    let name = key.to_string();
    Dependency::new(key, move |_, _| {
        let name = name.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Err::<Provided, _>(DispatchError::Internal(format!("{name} unavailable")))
        }
    })
}

/// A handler answering `body` as text.
pub fn text_handler(builder: HandlerBuilder, body: &'static str) -> Handler {
    builder
        .to_sync(move |_, _| Ok::<_, DispatchError>(body))
        .build()
        .unwrap()
}

/// CORS policy restricted to one origin, `GET`/`POST` and `X-Token`.
pub fn restricted_cors() -> CorsConfig {
    CorsConfig {
        allow_origins: vec!["https://app.example".into()],
        allow_methods: vec!["GET".into(), "POST".into()],
        allow_headers: vec!["X-Token".into()],
        ..CorsConfig::default()
    }
}

/// Sender that records each message in `log` and keeps it.
pub struct LoggingSender {
    pub log: EventLog,
    pub messages: Mutex<Vec<WireMessage>>,
}

impl LoggingSender {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            messages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Sender for LoggingSender {
    async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        match &message {
            WireMessage::Start { status, .. } => self.log.push(format!("send:start:{status}")),
            WireMessage::Body { .. } => self.log.push("send:body"),
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }
}

/// Serve `app` on an ephemeral port.
pub async fn start_server(app: App) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    let server = HttpServer::new(app);
    tokio::spawn(async move {
        server.run(listener, &server_shutdown).await.unwrap();
    });
    (addr, shutdown)
}
