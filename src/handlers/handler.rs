//! Route handlers: one callable endpoint plus everything the dispatcher needs to run it.
//!
//! # Responsibilities
//! - Hold the callable, its execution mode, guards, hooks and cache policy
//! - Hold the precomputed kwargs plan and the signature that validates it
//! - Convert a handler's domain result into a `Response`
//!
//! # Design Decisions
//! - Everything is decided at build time; a built `Handler` is immutable
//! - Sync callables run inline unless marked `sync_to_thread`, then on the blocking pool

use std::future::Future;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::cache::CachePolicy;
use crate::dependency::cleanup::CleanupLease;
use crate::dependency::provider::Dependency;
use crate::error::{BuildError, DispatchError};
use crate::handlers::kwargs::Kwargs;
use crate::handlers::params::{DataEncoding, KwargsModel, ParamSpec};
use crate::handlers::signature::{DeclaredSignature, Signature};
use crate::http::response::{Response, OCTET_STREAM};
use crate::http::Request;
use crate::security::guards::Guard;

/// A handler's domain result.
#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Text(String),
    Json(serde_json::Value),
    Bytes(Bytes),
    /// A fully formed response, sent as-is.
    Response(Response),
}

impl Payload {
    /// Whether the payload counts as "no result": `Empty`, empty text or
    /// bytes, and JSON `null`, `false`, `0`, `""`, `[]` or `{}`.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Empty => true,
            Payload::Text(text) => text.is_empty(),
            Payload::Bytes(body) => body.is_empty(),
            Payload::Json(value) => match value {
                serde_json::Value::Null => true,
                serde_json::Value::Bool(b) => !b,
                serde_json::Value::Number(n) => n.as_f64() == Some(0.0),
                serde_json::Value::String(s) => s.is_empty(),
                serde_json::Value::Array(items) => items.is_empty(),
                serde_json::Value::Object(map) => map.is_empty(),
            },
            Payload::Response(_) => false,
        }
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Empty
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Json(v)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<Response> for Payload {
    fn from(r: Response) -> Self {
        Payload::Response(r)
    }
}

pub type HandlerResult = Result<Payload, DispatchError>;

pub type SyncHandlerFn = Arc<dyn Fn(&Request, Kwargs) -> HandlerResult + Send + Sync>;
pub type AsyncHandlerFn = Arc<dyn Fn(Request, Kwargs) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone)]
pub enum HandlerFn {
    Sync(SyncHandlerFn),
    Async(AsyncHandlerFn),
}

/// Where a sync callable runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// On the request task.
    #[default]
    Inline,
    /// On tokio's blocking pool.
    Blocking,
}

/// Runs before resolution. A non-empty payload (see [`Payload::is_empty`])
/// short-circuits the handler; `None` or an empty one lets it run.
pub type BeforeRequestHook =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Option<Payload>, DispatchError>> + Send + Sync>;

/// Runs once the response has been sent.
pub type AfterResponseHook = Arc<dyn Fn(Request) -> BoxFuture<'static, Result<(), DispatchError>> + Send + Sync>;

/// Turns a payload into a response.
pub trait ResponseConverter: Send + Sync {
    fn convert(&self, request: &Request, handler: &Handler, payload: Payload) -> Result<Response, DispatchError>;
}

/// Status code, media type and extra headers come from the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConverter;

impl ResponseConverter for DefaultConverter {
    fn convert(&self, _request: &Request, handler: &Handler, payload: Payload) -> Result<Response, DispatchError> {
        let status = handler.status_code();
        let mut response = match payload {
            Payload::Response(response) => return Ok(response),
            Payload::Empty => Response::new(status),
            Payload::Text(text) => Response::text(status, text),
            Payload::Json(value) => Response::json(status, &value),
            Payload::Bytes(body) => Response::bytes(status, body, OCTET_STREAM),
        };
        if let Some(media_type) = handler.media_type() {
            response = response.with_media_type(media_type);
        }
        for (name, value) in handler.response_headers() {
            if response.header(name).is_none() {
                response = response.with_header(name.clone(), value.clone());
            }
        }
        Ok(response)
    }
}

pub struct Handler {
    name: String,
    methods: Vec<Method>,
    func: HandlerFn,
    mode: ExecutionMode,
    guards: Vec<Arc<dyn Guard>>,
    before_request: Option<BeforeRequestHook>,
    after_response: Option<AfterResponseHook>,
    cache: Option<CachePolicy>,
    kwargs_model: KwargsModel,
    signature: Arc<dyn Signature>,
    status_code: StatusCode,
    media_type: Option<String>,
    response_headers: Vec<(String, String)>,
    include_in_schema: bool,
    converter: Arc<dyn ResponseConverter>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("mode", &self.mode)
            .field("guards", &self.guards.len())
            .field("cache", &self.cache)
            .field("status_code", &self.status_code)
            .finish()
    }
}

impl Handler {
    pub fn builder(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder::new(name)
    }

    pub fn get(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder::new(name).method(Method::GET)
    }

    pub fn post(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder::new(name).method(Method::POST)
    }

    pub fn put(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder::new(name).method(Method::PUT)
    }

    pub fn patch(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder::new(name).method(Method::PATCH)
    }

    pub fn delete(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder::new(name).method(Method::DELETE)
    }

    pub fn options(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder::new(name).method(Method::OPTIONS)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn guards(&self) -> &[Arc<dyn Guard>] {
        &self.guards
    }

    pub fn cache(&self) -> Option<&CachePolicy> {
        self.cache.as_ref()
    }

    pub fn kwargs_model(&self) -> &KwargsModel {
        &self.kwargs_model
    }

    pub fn signature(&self) -> &dyn Signature {
        self.signature.as_ref()
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn response_headers(&self) -> &[(String, String)] {
        &self.response_headers
    }

    pub fn include_in_schema(&self) -> bool {
        self.include_in_schema
    }

    pub fn has_before_request(&self) -> bool {
        self.before_request.is_some()
    }

    pub fn has_after_response(&self) -> bool {
        self.after_response.is_some()
    }

    pub async fn before_request(&self, request: &Request) -> Result<Option<Payload>, DispatchError> {
        match &self.before_request {
            Some(hook) => hook(request.clone()).await,
            None => Ok(None),
        }
    }

    pub async fn after_response(&self, request: &Request) -> Result<(), DispatchError> {
        match &self.after_response {
            Some(hook) => hook(request.clone()).await,
            None => Ok(()),
        }
    }

    /// Call the handler function with resolved kwargs.
    pub async fn invoke(&self, request: &Request, kwargs: Kwargs) -> HandlerResult {
        self.call(request, kwargs, None).await
    }

    /// Like [`Handler::invoke`], holding `lease` until the callable returns.
    ///
    /// A blocking callable keeps running on its thread when the request is
    /// cancelled; the lease travels with it so dependency release waits.
    pub async fn invoke_leased(&self, request: &Request, kwargs: Kwargs, lease: CleanupLease) -> HandlerResult {
        self.call(request, kwargs, Some(lease)).await
    }

    async fn call(&self, request: &Request, kwargs: Kwargs, lease: Option<CleanupLease>) -> HandlerResult {
        match (&self.func, self.mode) {
            (HandlerFn::Async(f), _) => {
                let _lease = lease;
                f(request.clone(), kwargs).await
            }
            (HandlerFn::Sync(f), ExecutionMode::Inline) => {
                let _lease = lease;
                f(request, kwargs)
            }
            (HandlerFn::Sync(f), ExecutionMode::Blocking) => {
                let f = f.clone();
                let request = request.clone();
                tokio::task::spawn_blocking(move || {
                    let _lease = lease;
                    f(&request, kwargs)
                })
                .await
                .map_err(|e| DispatchError::Internal(format!("handler task failed: {e}")))?
            }
        }
    }

    pub fn to_response(&self, request: &Request, payload: Payload) -> Result<Response, DispatchError> {
        self.converter.convert(request, self, payload)
    }
}

/// Builder for [`Handler`]. Wiring errors surface from [`HandlerBuilder::build`].
pub struct HandlerBuilder {
    name: String,
    methods: Vec<Method>,
    func: Option<HandlerFn>,
    sync_to_thread: bool,
    guards: Vec<Arc<dyn Guard>>,
    before_request: Option<BeforeRequestHook>,
    after_response: Option<AfterResponseHook>,
    cache: Option<CachePolicy>,
    params: Vec<ParamSpec>,
    data: Option<DataEncoding>,
    body: bool,
    dependencies: Vec<Dependency>,
    signature: Option<Arc<dyn Signature>>,
    status_code: Option<StatusCode>,
    media_type: Option<String>,
    response_headers: Vec<(String, String)>,
    include_in_schema: bool,
    converter: Option<Arc<dyn ResponseConverter>>,
}

impl HandlerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            func: None,
            sync_to_thread: false,
            guards: Vec::new(),
            before_request: None,
            after_response: None,
            cache: None,
            params: Vec::new(),
            data: None,
            body: false,
            dependencies: Vec::new(),
            signature: None,
            status_code: None,
            media_type: None,
            response_headers: Vec::new(),
            include_in_schema: true,
            converter: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    pub fn methods(self, methods: impl IntoIterator<Item = Method>) -> Self {
        methods.into_iter().fold(self, Self::method)
    }

    /// Async handler function.
    pub fn to_async<F, Fut, P>(mut self, f: F) -> Self
    where
        F: Fn(Request, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, DispatchError>> + Send + 'static,
        P: Into<Payload>,
    {
        self.func = Some(HandlerFn::Async(Arc::new(
            move |request: Request, kwargs: Kwargs| -> BoxFuture<'static, HandlerResult> {
                let fut = f(request, kwargs);
                Box::pin(async move {
                    let result: HandlerResult = fut.await.map(Into::into);
                    result
                })
            },
        )));
        self
    }

    /// Sync handler function.
    pub fn to_sync<F, P>(mut self, f: F) -> Self
    where
        F: Fn(&Request, Kwargs) -> Result<P, DispatchError> + Send + Sync + 'static,
        P: Into<Payload>,
    {
        self.func = Some(HandlerFn::Sync(Arc::new(
            move |request: &Request, kwargs: Kwargs| -> HandlerResult { f(request, kwargs).map(Into::into) },
        )));
        self
    }

    /// Run a sync handler on the blocking pool instead of the request task.
    pub fn sync_to_thread(mut self, enabled: bool) -> Self {
        self.sync_to_thread = enabled;
        self
    }

    pub fn guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn before_request<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Payload>, DispatchError>> + Send + 'static,
    {
        self.before_request = Some(Arc::new(
            move |request: Request| -> BoxFuture<'static, Result<Option<Payload>, DispatchError>> {
                Box::pin(f(request))
            },
        ));
        self
    }

    pub fn after_response<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        self.after_response = Some(Arc::new(
            move |request: Request| -> BoxFuture<'static, Result<(), DispatchError>> { Box::pin(f(request)) },
        ));
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Decode the body into the `data` kwarg.
    pub fn data(mut self, encoding: DataEncoding) -> Self {
        self.data = Some(encoding);
        self
    }

    /// Pass the raw body as the `body` kwarg.
    pub fn body(mut self) -> Self {
        self.body = true;
        self
    }

    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn signature(mut self, signature: Arc<dyn Signature>) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers.push((name.into(), value.into()));
        self
    }

    pub fn include_in_schema(mut self, include: bool) -> Self {
        self.include_in_schema = include;
        self
    }

    pub fn converter(mut self, converter: Arc<dyn ResponseConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn build(self) -> Result<Handler, BuildError> {
        if self.methods.is_empty() {
            return Err(BuildError::NoMethods(self.name));
        }
        let Some(func) = self.func else {
            return Err(BuildError::MissingHandlerFn(self.name));
        };

        let status_code = self
            .status_code
            .unwrap_or_else(|| default_status(&self.methods));
        let mode = match (&func, self.sync_to_thread) {
            (HandlerFn::Sync(_), true) => ExecutionMode::Blocking,
            _ => ExecutionMode::Inline,
        };
        let signature: Arc<dyn Signature> = match self.signature {
            Some(signature) => signature,
            None => Arc::new(DeclaredSignature::new(self.params.clone())),
        };
        let converter: Arc<dyn ResponseConverter> = match self.converter {
            Some(converter) => converter,
            None => Arc::new(DefaultConverter),
        };
        let kwargs_model = KwargsModel::build(self.params, self.data, self.body, self.dependencies)?;

        Ok(Handler {
            name: self.name,
            methods: self.methods,
            func,
            mode,
            guards: self.guards,
            before_request: self.before_request,
            after_response: self.after_response,
            cache: self.cache,
            kwargs_model,
            signature,
            status_code,
            media_type: self.media_type,
            response_headers: self.response_headers,
            include_in_schema: self.include_in_schema,
            converter,
        })
    }
}

fn default_status(methods: &[Method]) -> StatusCode {
    match methods {
        [m] if *m == Method::POST => StatusCode::CREATED,
        [m] if *m == Method::DELETE => StatusCode::NO_CONTENT,
        _ => StatusCode::OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppContext;
    use crate::http::message::BufferedReceiver;
    use crate::http::scope::Scope;
    use serde_json::json;

    fn request() -> Request {
        Request::new(
            Scope::new(Method::GET, "/"),
            Arc::new(BufferedReceiver::default()),
            Arc::new(AppContext::default()),
            "test",
        )
    }

    #[test]
    fn test_default_status_codes() {
        let ok = |_: &Request, _: Kwargs| Ok::<_, DispatchError>(());
        assert_eq!(Handler::get("a").to_sync(ok).build().unwrap().status_code(), StatusCode::OK);
        assert_eq!(Handler::post("b").to_sync(ok).build().unwrap().status_code(), StatusCode::CREATED);
        assert_eq!(
            Handler::delete("c").to_sync(ok).build().unwrap().status_code(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            Handler::builder("d")
                .methods([Method::GET, Method::POST])
                .to_sync(ok)
                .build()
                .unwrap()
                .status_code(),
            StatusCode::OK
        );
    }

    #[test]
    fn test_empty_payloads() {
        for payload in [
            Payload::Empty,
            Payload::Text(String::new()),
            Payload::Bytes(Bytes::new()),
            Payload::Json(json!(null)),
            Payload::Json(json!(false)),
            Payload::Json(json!(0)),
            Payload::Json(json!([])),
            Payload::Json(json!({})),
        ] {
            assert!(payload.is_empty(), "{payload:?}");
        }
        for payload in [
            Payload::Text("stop".into()),
            Payload::Json(json!({"stop": true})),
            Payload::Json(json!(0.5)),
            Payload::Response(Response::new(StatusCode::NO_CONTENT)),
        ] {
            assert!(!payload.is_empty(), "{payload:?}");
        }
    }

    #[test]
    fn test_build_errors() {
        assert!(matches!(
            Handler::builder("none").to_sync(|_, _| Ok::<_, DispatchError>(())).build(),
            Err(BuildError::NoMethods(_))
        ));
        assert!(matches!(
            Handler::get("nofn").build(),
            Err(BuildError::MissingHandlerFn(_))
        ));
    }

    #[test]
    fn test_execution_mode() {
        let sync = Handler::get("s")
            .to_sync(|_, _| Ok::<_, DispatchError>(()))
            .sync_to_thread(true)
            .build()
            .unwrap();
        assert_eq!(sync.mode(), ExecutionMode::Blocking);

        let async_handler = Handler::get("a")
            .to_async(|_, _| async { Ok::<_, DispatchError>(()) })
            .sync_to_thread(true)
            .build()
            .unwrap();
        assert_eq!(async_handler.mode(), ExecutionMode::Inline);
    }

    #[tokio::test]
    async fn test_invoke_each_mode() {
        let blocking = Handler::get("blocking")
            .to_sync(|_, kwargs| Ok::<_, DispatchError>(json!({"n": kwargs.i64("n")})))
            .sync_to_thread(true)
            .build()
            .unwrap();
        let mut kwargs = Kwargs::new();
        kwargs.insert("n", json!(3));
        let payload = blocking.invoke(&request(), kwargs).await.unwrap();
        assert!(matches!(payload, Payload::Json(v) if v == json!({"n": 3})));

        let asynchronous = Handler::get("async")
            .to_async(|req, _| async move { Ok::<_, DispatchError>(req.path().to_string()) })
            .build()
            .unwrap();
        let payload = asynchronous.invoke(&request(), Kwargs::new()).await.unwrap();
        assert!(matches!(payload, Payload::Text(t) if t == "/"));
    }

    #[test]
    fn test_default_converter_applies_handler_settings() {
        let handler = Handler::post("create")
            .to_sync(|_, _| Ok::<_, DispatchError>(()))
            .header("x-handler", "create")
            .media_type("application/vnd.api+json")
            .build()
            .unwrap();

        let response = handler
            .to_response(&request(), Payload::Json(json!({"id": 1})))
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.header("x-handler"), Some("create"));
        assert_eq!(response.media_type(), Some("application/vnd.api+json"));

        let passthrough = handler
            .to_response(&request(), Payload::Response(Response::text(StatusCode::ACCEPTED, "ok")))
            .unwrap();
        assert_eq!(passthrough.status(), StatusCode::ACCEPTED);
        assert!(passthrough.header("x-handler").is_none());
    }
}
