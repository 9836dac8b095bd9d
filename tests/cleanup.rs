//! Dependency release ordering and upload teardown on every exit path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use route_dispatch::handlers::DataEncoding;
use route_dispatch::http::UploadFile;
use route_dispatch::testing::TestClient;
use route_dispatch::{App, DispatchError, Handler};

mod common;

use common::{failing_dependency, tracked_dependency, tracked_dependency_with, EventLog};

#[tokio::test]
async fn test_releases_in_reverse_order_on_success() {
    let log = EventLog::new();
    let handler = {
        let handler_log = log.clone();
        Handler::get("chain")
            .dependency(tracked_dependency("a", &log))
            .dependency(tracked_dependency("b", &log).depends_on(["a"]))
            .dependency(tracked_dependency("c", &log).depends_on(["b"]))
            .to_sync(move |_, kwargs| {
                handler_log.push("handler");
                Ok::<_, DispatchError>(format!(
                    "{}{}{}",
                    kwargs.str("a").unwrap_or_default(),
                    kwargs.str("b").unwrap_or_default(),
                    kwargs.str("c").unwrap_or_default()
                ))
            })
            .build()
            .unwrap()
    };
    let client = TestClient::new(App::builder().route("/chain", handler).build().unwrap());

    let response = client.get("/chain").send().await.unwrap();
    assert_eq!(response.text(), "abc");
    assert_eq!(
        log.events(),
        vec![
            "acquire:a", "acquire:b", "acquire:c", "handler", "release:c", "release:b", "release:a"
        ]
    );
}

#[tokio::test]
async fn test_releases_exactly_once_when_handler_fails() {
    let log = EventLog::new();
    let handler = Handler::get("fails")
        .dependency(tracked_dependency("a", &log))
        .dependency(tracked_dependency("b", &log).depends_on(["a"]))
        .dependency(tracked_dependency("c", &log).depends_on(["b"]))
        .to_sync(|_, _| Err::<(), _>(DispatchError::PermissionDenied("read only".into())))
        .build()
        .unwrap();
    let client = TestClient::new(App::builder().route("/fails", handler).build().unwrap());

    let response = client.get("/fails").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let releases: Vec<_> = log
        .events()
        .into_iter()
        .filter(|e| e.starts_with("release:"))
        .collect();
    assert_eq!(releases, vec!["release:c", "release:b", "release:a"]);
}

#[tokio::test]
async fn test_batch_failure_releases_acquired_values() {
    let log = EventLog::new();
    let handler = {
        let handler_log = log.clone();
        Handler::get("partial")
            .dependency(tracked_dependency("cache", &log))
            .dependency(tracked_dependency("db", &log).depends_on(["cache"]))
            .dependency(tracked_dependency("queue", &log).depends_on(["db"]))
            .dependency(failing_dependency("mailer").depends_on(["db"]))
            .to_sync(move |_, _| {
                handler_log.push("handler");
                Ok::<_, DispatchError>(())
            })
            .build()
            .unwrap()
    };
    let client = TestClient::new(App::builder().route("/partial", handler).build().unwrap());

    let response = client.get("/partial").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let events = log.events();
    assert!(!events.contains(&"handler".to_string()));
    assert_eq!(log.count("release:cache"), 1);
    assert_eq!(log.count("release:db"), 1);
    let db = events.iter().position(|e| e == "release:db").unwrap();
    let cache = events.iter().position(|e| e == "release:cache").unwrap();
    assert!(db < cache);
}

#[tokio::test]
async fn test_release_failure_surfaces_after_success() {
    let log = EventLog::new();
    let handler = Handler::get("leaky")
        .dependency(tracked_dependency("a", &log))
        .dependency(tracked_dependency_with("b", &log, true))
        .to_sync(|_, _| Ok::<_, DispatchError>("done"))
        .build()
        .unwrap();
    let client = TestClient::new(App::builder().route("/leaky", handler).build().unwrap());

    let response = client.get("/leaky").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(log.count("release:a"), 1);
    assert_eq!(log.count("release:b"), 1);
}

#[tokio::test]
async fn test_compound_error_keeps_handler_status() {
    let log = EventLog::new();
    let handler = Handler::get("both")
        .dependency(tracked_dependency_with("a", &log, true))
        .to_sync(|_, _| Err::<(), _>(DispatchError::NotAuthorized("expired token".into())))
        .build()
        .unwrap();
    let client = TestClient::new(App::builder().route("/both", handler).build().unwrap());

    let response = client.get("/both").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(log.count("release:a"), 1);
}

#[tokio::test]
async fn test_cancelled_request_still_releases() {
    let log = EventLog::new();
    let handler = Handler::get("slow")
        .dependency(tracked_dependency("conn", &log))
        .to_async(|_, _| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, DispatchError>(())
        })
        .build()
        .unwrap();
    let client = TestClient::new(App::builder().route("/slow", handler).build().unwrap());

    let result = tokio::time::timeout(Duration::from_millis(50), client.get("/slow").send()).await;
    assert!(result.is_err());

    for _ in 0..50 {
        if log.count("release:conn") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(log.events(), vec!["acquire:conn", "release:conn"]);
}

#[tokio::test]
async fn test_cancelled_blocking_handler_finishes_before_release() {
    let log = EventLog::new();
    let handler = {
        let handler_log = log.clone();
        Handler::get("report")
            .dependency(tracked_dependency("conn", &log))
            .to_sync(move |_, kwargs| {
                std::thread::sleep(Duration::from_millis(300));
                handler_log.push(format!("used:{}", kwargs.str("conn").unwrap_or_default()));
                Ok::<_, DispatchError>(())
            })
            .sync_to_thread(true)
            .build()
            .unwrap()
    };
    let client = TestClient::new(App::builder().route("/report", handler).build().unwrap());

    let result = tokio::time::timeout(Duration::from_millis(50), client.get("/report").send()).await;
    assert!(result.is_err());
    assert_eq!(log.events(), vec!["acquire:conn"]);

    for _ in 0..100 {
        if log.count("release:conn") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(log.events(), vec!["acquire:conn", "used:conn", "release:conn"]);
}

#[tokio::test]
async fn test_uploads_closed_after_request() {
    let seen: Arc<Mutex<Vec<Arc<UploadFile>>>> = Arc::default();
    let handler = {
        let seen = seen.clone();
        Handler::post("upload")
            .data(DataEncoding::MultiPart)
            .to_async(move |_, kwargs| {
                let seen = seen.clone();
                async move {
                    let form = kwargs
                        .form("data")
                        .cloned()
                        .ok_or_else(|| DispatchError::client("missing form"))?;
                    let mut sizes = Vec::new();
                    for upload in form.files() {
                        assert!(upload.path().exists());
                        let content = upload.read().await.map_err(DispatchError::handler)?;
                        sizes.push(format!("{}={}", upload.filename(), content.len()));
                        seen.lock().unwrap().push(upload.clone());
                    }
                    Ok::<_, DispatchError>(sizes.join(","))
                }
            })
            .build()
            .unwrap()
    };
    let client = TestClient::new(App::builder().route("/upload", handler).build().unwrap());

    let response = client
        .post("/upload")
        .field("title", "holiday")
        .file("photo", "beach.jpg", "image/jpeg", &b"\xff\xd8jpegdata"[..])
        .file("notes", "notes.txt", "text/plain", "sunny")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.text(), "beach.jpg=10,notes.txt=5");

    let uploads = seen.lock().unwrap().clone();
    assert_eq!(uploads.len(), 2);
    for upload in &uploads {
        assert!(upload.is_closed());
        assert!(!upload.path().exists());
    }
    assert_eq!(response.state().uploads().len(), 2);
}

#[tokio::test]
async fn test_uploads_closed_when_handler_fails_and_never_twice() {
    let handler = Handler::post("upload")
        .data(DataEncoding::MultiPart)
        .to_async(|_, kwargs| async move {
            if let Some(form) = kwargs.form("data") {
                if let Some(upload) = form.get_file("keep") {
                    assert!(upload.close().await);
                }
            }
            Err::<(), _>(DispatchError::Internal("rejected".into()))
        })
        .build()
        .unwrap();
    let client = TestClient::new(App::builder().route("/upload", handler).build().unwrap());

    let response = client
        .post("/upload")
        .file("keep", "a.bin", "application/octet-stream", "aaaa")
        .file("other", "b.bin", "application/octet-stream", "bbbb")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let uploads = response.state().uploads();
    assert_eq!(uploads.len(), 2);
    assert!(uploads.iter().all(|u| u.is_closed()));
    assert_eq!(response.state().close_uploads().await, 0);
}
