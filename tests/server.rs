//! HTTP transport: middleware stack and real socket round trips.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use route_dispatch::cache::{CachePolicy, MemoryStore};
use route_dispatch::config::AppConfig;
use route_dispatch::http::X_REQUEST_ID;
use route_dispatch::{App, DispatchError, Handler, HttpServer};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tower::ServiceExt;

mod common;

use common::{start_server, text_handler, EventLog};

fn echo_app(config: AppConfig) -> App {
    let echo = Handler::post("echo")
        .body()
        .to_sync(|_, kwargs| {
            let body = kwargs.bytes("body").cloned().unwrap_or_default();
            Ok::<_, DispatchError>(json!({"received": body.len()}))
        })
        .build()
        .unwrap();
    App::builder()
        .config(config)
        .route("/health", text_handler(Handler::get("health"), "ok"))
        .route("/echo", echo)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_round_trip_over_tcp() {
    let (addr, shutdown) = start_server(echo_app(AppConfig::default())).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");

    let response = client
        .post(format!("http://{addr}/echo"))
        .body("twelve bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["received"], 12);

    let response = client
        .get(format!("http://{addr}/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    shutdown.trigger();
}

#[tokio::test]
async fn test_security_headers_and_request_id() {
    let router = HttpServer::new(echo_app(AppConfig::default())).router();

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    assert!(response.headers().contains_key(X_REQUEST_ID));
}

#[tokio::test]
async fn test_client_request_id_is_echoed() {
    let router = HttpServer::new(echo_app(AppConfig::default())).router();

    let response = router
        .oneshot(
            Request::get("/health")
                .header(X_REQUEST_ID, "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()[X_REQUEST_ID], "req-42");
}

#[tokio::test]
async fn test_security_headers_can_be_disabled() {
    let mut config = AppConfig::default();
    config.security.enable_headers = false;
    let router = HttpServer::new(echo_app(config)).router();

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(!response.headers().contains_key("x-frame-options"));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = AppConfig::default();
    config.uploads.max_body_size = 16;
    let router = HttpServer::new(echo_app(config)).router();

    let response = router
        .clone()
        .oneshot(
            Request::post("/echo")
                .header("content-length", "64")
                .body(Body::from(vec![b'x'; 64]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let stream = futures_util::stream::iter(vec![
        Ok::<_, std::io::Error>(bytes::Bytes::from(vec![b'x'; 10])),
        Ok(bytes::Bytes::from(vec![b'x'; 10])),
    ]);
    let response = router
        .oneshot(
            Request::post("/echo")
                .body(Body::from_stream(stream))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status_code"], 413);
}

#[tokio::test]
async fn test_method_not_allowed_over_the_wire() {
    let router = HttpServer::new(echo_app(AppConfig::default())).router();

    let response = router
        .oneshot(Request::delete("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()["allow"], "GET, OPTIONS");
}

#[tokio::test]
async fn test_slow_after_response_hook_does_not_delay_client() {
    let log = EventLog::new();
    let handler = {
        let hook_log = log.clone();
        Handler::get("audited")
            .after_response(move |_| {
                let log = hook_log.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    log.push("audit written");
                    Ok(())
                }
            })
            .to_sync(|_, _| Ok::<_, DispatchError>("done"))
            .build()
            .unwrap()
    };
    let app = App::builder().route("/audited", handler).build().unwrap();
    let (addr, shutdown) = start_server(app).await;

    let started = Instant::now();
    let response = reqwest::get(format!("http://{addr}/audited")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "done");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(log.count("audit written"), 0);

    for _ in 0..40 {
        if log.count("audit written") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(log.events(), vec!["audit written"]);
    shutdown.trigger();
}

#[tokio::test]
async fn test_requests_beyond_max_connections_wait_for_a_slot() {
    let gate = Arc::new(Notify::new());
    let held = {
        let gate = gate.clone();
        Handler::get("held")
            .to_async(move |_, _| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok::<_, DispatchError>("released")
                }
            })
            .build()
            .unwrap()
    };
    let mut config = AppConfig::default();
    config.listener.max_connections = 1;
    let app = App::builder()
        .config(config)
        .route("/health", text_handler(Handler::get("health"), "ok"))
        .route("/held", held)
        .build()
        .unwrap();
    let router = HttpServer::new(app).router();

    let first = tokio::spawn(
        router
            .clone()
            .oneshot(Request::get("/held").body(Body::empty()).unwrap()),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let queued = tokio::time::timeout(
        Duration::from_millis(100),
        router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap()),
    )
    .await;
    assert!(queued.is_err());

    gate.notify_one();
    let response = first.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = tokio::time::timeout(
        Duration::from_secs(1),
        router.oneshot(Request::get("/health").body(Body::empty()).unwrap()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_server_sweeps_expired_cache_entries() {
    let store = Arc::new(MemoryStore::new());
    let short = Handler::get("short")
        .cache(CachePolicy::new().ttl(Duration::from_millis(50)))
        .to_sync(|_, _| Ok::<_, DispatchError>("short"))
        .build()
        .unwrap();
    let pinned = Handler::get("pinned")
        .cache(CachePolicy::new().never_expire())
        .to_sync(|_, _| Ok::<_, DispatchError>("pinned"))
        .build()
        .unwrap();
    let mut config = AppConfig::default();
    config.response_cache.sweep_interval_secs = 1;
    let app = App::builder()
        .config(config)
        .store(store.clone())
        .route("/short", short)
        .route("/pinned", pinned)
        .build()
        .unwrap();
    let (addr, shutdown) = start_server(app).await;

    let client = reqwest::Client::new();
    for page in 0..3 {
        let response = client
            .get(format!("http://{addr}/short?page={page}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }
    let response = client
        .get(format!("http://{addr}/pinned"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(100)).await;

    for _ in 0..30 {
        if store.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.len(), 1);
    shutdown.trigger();
}
