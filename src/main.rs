//! route-dispatch demo server.
//!
//! Serves a small item API through the dispatch pipeline:
//!
//! ```text
//!  GET    /health          liveness, never cached
//!  GET    /items           list, cached for 30s, `limit` query param
//!  POST   /items           create from JSON data (201)
//!  GET    /items/{id}      lookup with a request-scoped "db" dependency
//!  DELETE /items/{id}      requires `x-api-key` (204)
//!  OPTIONS any route       CORS preflight negotiation
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;

use route_dispatch::cache::CachePolicy;
use route_dispatch::config::{load_config, AppConfig};
use route_dispatch::dependency::{Dependency, Provided};
use route_dispatch::handlers::{DataEncoding, ParamSpec, Value};
use route_dispatch::lifecycle::{wait_for_signal, Shutdown};
use route_dispatch::observability::{logging, metrics};
use route_dispatch::security::RequireHeader;
use route_dispatch::{App, DispatchError, Handler, HttpServer};

#[derive(Debug, Parser)]
#[command(name = "route-dispatch", version, about = "HTTP dispatch pipeline demo server")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

type ItemStore = Arc<Mutex<Vec<serde_json::Value>>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "route-dispatch starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        cors = config.cors.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
    let app = demo_app(config)?;

    let shutdown = Shutdown::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let server = HttpServer::new(app);
    let serve = server.run(listener, &shutdown);
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        _ = shutdown.wait() => {
            if tokio::time::timeout(grace, &mut serve).await.is_err() {
                tracing::warn!(grace_secs = grace.as_secs(), "Grace period elapsed, forcing exit");
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_app(config: AppConfig) -> Result<App, route_dispatch::BuildError> {
    let items: ItemStore = Arc::new(Mutex::new(Vec::new()));

    let health = Handler::get("health")
        .to_sync(|_, _| Ok::<_, DispatchError>(json!({"status": "ok"})))
        .build()?;

    let list_items = {
        let items = items.clone();
        Handler::get("list_items")
            .param(ParamSpec::query("limit").int().default(50).ge(1.0).le(500.0))
            .cache(CachePolicy::new().ttl(Duration::from_secs(30)))
            .to_sync(move |_, kwargs| {
                let limit = kwargs.i64("limit").unwrap_or(50).max(0) as usize;
                let page: Vec<_> = {
                    let items = items.lock().unwrap_or_else(PoisonError::into_inner);
                    items.iter().take(limit).cloned().collect()
                };
                Ok::<_, DispatchError>(json!(page))
            })
            .build()?
    };

    let create_item = {
        let items = items.clone();
        Handler::post("create_item")
            .data(DataEncoding::Json)
            .to_sync(move |_, kwargs| {
                let Some(data) = kwargs.json("data").cloned() else {
                    return Err(DispatchError::client("Missing item"));
                };
                let mut items = items.lock().unwrap_or_else(PoisonError::into_inner);
                let item = json!({"id": items.len() + 1, "item": data});
                items.push(item.clone());
                Ok(item)
            })
            .build()?
    };

    let get_item = {
        let items = items.clone();
        Handler::get("get_item")
            .param(ParamSpec::path("id").int().ge(1.0))
            .dependency(Dependency::new("db", move |request, _| {
                let items = items.clone();
                let request_id = request.request_id().to_string();
                async move {
                    tracing::debug!(request_id = %request_id, "Acquired item store handle");
                    Ok(Provided::with_release(Value::object(items), move || async move {
                        tracing::debug!(request_id = %request_id, "Released item store handle");
                        Ok(())
                    }))
                }
            }))
            .to_async(|_, kwargs| async move {
                let id = kwargs.i64("id").unwrap_or_default();
                let Some(store) = kwargs.object::<ItemStore>("db") else {
                    return Err(DispatchError::Internal("item store unavailable".into()));
                };
                let item = {
                    let items = store.lock().unwrap_or_else(PoisonError::into_inner);
                    usize::try_from(id - 1)
                        .ok()
                        .and_then(|index| items.get(index).cloned())
                };
                item.ok_or(DispatchError::NotFound)
            })
            .build()?
    };

    let delete_item = Handler::delete("delete_item")
        .param(ParamSpec::path("id").int())
        .guard(Arc::new(RequireHeader::present("x-api-key")))
        .to_sync(|_, _| Ok::<_, DispatchError>(()))
        .build()?;

    App::builder()
        .config(config)
        .route("/health", health)
        .route("/items", list_items)
        .route("/items", create_item)
        .route("/items/{id}", get_item)
        .route("/items/{id}", delete_item)
        .build()
}
