//! Dependency declarations and provider results.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::dependency::cleanup::{ReleaseAction, ReleaseFuture};
use crate::error::{BoxError, DispatchError};
use crate::handlers::kwargs::{Kwargs, Value};
use crate::http::Request;

/// What a provider hands back: a value and, optionally, how to release it.
pub struct Provided {
    value: Value,
    release: Option<ReleaseAction>,
}

impl Provided {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            release: None,
        }
    }

    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Self::value(Value::object(value))
    }

    /// A value whose release runs after the handler finishes.
    pub fn with_release<F, Fut>(value: impl Into<Value>, release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            value: value.into(),
            release: Some(Box::new(move || -> ReleaseFuture { Box::pin(release()) })),
        }
    }

    pub fn into_parts(self) -> (Value, Option<ReleaseAction>) {
        (self.value, self.release)
    }
}

pub type ProviderFn =
    Arc<dyn Fn(Request, Kwargs) -> BoxFuture<'static, Result<Provided, DispatchError>> + Send + Sync>;

/// A named dependency and the provider that produces it.
///
/// The provider receives the kwargs resolved before its batch.
#[derive(Clone)]
pub struct Dependency {
    key: String,
    depends_on: Vec<String>,
    provider: ProviderFn,
}

impl Dependency {
    pub fn new<F, Fut>(key: impl Into<String>, provider: F) -> Self
    where
        F: Fn(Request, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Provided, DispatchError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            depends_on: Vec::new(),
            provider: Arc::new(
                move |request: Request, kwargs: Kwargs| -> BoxFuture<'static, Result<Provided, DispatchError>> {
                    Box::pin(provider(request, kwargs))
                },
            ),
        }
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub async fn provide(&self, request: Request, kwargs: Kwargs) -> Result<Provided, DispatchError> {
        (self.provider)(request, kwargs).await
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("key", &self.key)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}
