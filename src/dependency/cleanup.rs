//! Ordered release of dependency-scoped resources.
//!
//! # Responsibilities
//! - Collect release actions in acquisition order
//! - Release them exactly once, in reverse order, collecting every failure
//! - Still release when the owning request task is cancelled
//! - Never release while a detached user of the values (a blocking handler
//!   thread) still holds a lease
//!
//! # Design Decisions
//! - A failing release never stops the ones after it
//! - Dropping an unreleased group hands the remaining actions to the runtime

use std::future::Future;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::{BoxError, DispatchError};
use crate::observability::metrics;

pub type ReleaseFuture = BoxFuture<'static, Result<(), BoxError>>;

/// A single deferred release, run at most once.
pub type ReleaseAction = Box<dyn FnOnce() -> ReleaseFuture + Send>;

/// One or more release actions failed.
#[derive(Debug, Error)]
#[error("cleanup failed for {}", format_failures(.failures))]
pub struct CleanupError {
    /// `(dependency key, error)` in release order.
    pub failures: Vec<(String, BoxError)>,
}

fn format_failures(failures: &[(String, BoxError)]) -> String {
    failures
        .iter()
        .map(|(key, e)| format!("{key} ({e})"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Default)]
pub struct CleanupGroup {
    actions: Vec<(String, ReleaseAction)>,
    leases: Vec<oneshot::Receiver<()>>,
}

/// Keeps the group's release on hold while it is alive.
///
/// Move it into work that outlives the request future, such as a
/// `spawn_blocking` closure using the resolved values.
#[derive(Debug)]
pub struct CleanupLease {
    _held: oneshot::Sender<()>,
}

impl std::fmt::Debug for CleanupGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupGroup")
            .field("keys", &self.actions.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("leases", &self.leases.len())
            .finish()
    }
}

impl CleanupGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a release closure for `key`.
    pub fn push<F, Fut>(&mut self, key: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let action: ReleaseAction = Box::new(move || -> ReleaseFuture { Box::pin(release()) });
        self.actions.push((key.into(), action));
    }

    pub fn push_action(&mut self, key: impl Into<String>, action: ReleaseAction) {
        self.actions.push((key.into(), action));
    }

    /// Hand out a lease; release waits until every lease is dropped.
    pub fn lease(&mut self) -> CleanupLease {
        let (tx, rx) = oneshot::channel();
        self.leases.push(rx);
        CleanupLease { _held: tx }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Release every action, newest first.
    pub async fn release(mut self) -> Result<(), CleanupError> {
        let actions = std::mem::take(&mut self.actions);
        let leases = std::mem::take(&mut self.leases);
        release_after(leases, actions).await
    }

    /// Run `fut`, then release the group whatever its outcome.
    ///
    /// If the returned future is dropped before completion the group is
    /// released in the background.
    pub async fn scope<T, Fut>(self, fut: Fut) -> Result<T, DispatchError>
    where
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let result = fut.await;
        let released = self.release().await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup)) => Err(DispatchError::Cleanup(cleanup)),
            (Err(primary), Ok(())) => Err(primary),
            (Err(primary), Err(cleanup)) => Err(DispatchError::Compound {
                primary: Box::new(primary),
                cleanup,
            }),
        }
    }

    /// Release the group on a failure path, attaching any cleanup errors to `err`.
    pub async fn fail_with(self, err: DispatchError) -> DispatchError {
        match self.release().await {
            Ok(()) => err,
            Err(cleanup) => DispatchError::Compound {
                primary: Box::new(err),
                cleanup,
            },
        }
    }
}

impl Drop for CleanupGroup {
    fn drop(&mut self) {
        if self.actions.is_empty() {
            return;
        }
        let actions = std::mem::take(&mut self.actions);
        let leases = std::mem::take(&mut self.leases);
        match Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(
                    count = actions.len(),
                    leases = leases.len(),
                    "Releasing abandoned cleanup group"
                );
                handle.spawn(async move {
                    if let Err(e) = release_after(leases, actions).await {
                        tracing::error!(error = %e, "Background cleanup failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    count = actions.len(),
                    "No runtime available, cleanup actions dropped"
                );
            }
        }
    }
}

async fn release_after(
    leases: Vec<oneshot::Receiver<()>>,
    actions: Vec<(String, ReleaseAction)>,
) -> Result<(), CleanupError> {
    // A lease resolves with an error once its holder is dropped.
    for lease in leases {
        let _ = lease.await;
    }
    release_all(actions).await
}

async fn release_all(actions: Vec<(String, ReleaseAction)>) -> Result<(), CleanupError> {
    let mut failures = Vec::new();
    for (key, action) in actions.into_iter().rev() {
        if let Err(e) = action().await {
            tracing::warn!(dependency = %key, error = %e, "Dependency cleanup failed");
            failures.push((key, e));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        metrics::record_cleanup_failures(failures.len());
        Err(CleanupError { failures })
    }
}
