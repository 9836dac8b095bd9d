//! Kwargs resolution for a single handler invocation.

use futures_util::future::join_all;

use crate::dependency::cleanup::CleanupGroup;
use crate::error::DispatchError;
use crate::handlers::kwargs::{Kwargs, Value};
use crate::handlers::params::{DataEncoding, KwargsModel, ParamSource, BODY_KWARG, DATA_KWARG};
use crate::handlers::signature::Signature;
use crate::http::Request;

/// Resolve every kwarg declared by `model`, then validate through `signature`.
///
/// On success the caller owns the returned cleanup group and must release it
/// after invoking the handler. On failure the group has already been released.
pub async fn prepare(
    model: &KwargsModel,
    signature: &dyn Signature,
    request: &Request,
) -> Result<(Kwargs, CleanupGroup), DispatchError> {
    let mut kwargs = extract_params(model, request);

    if let Some(encoding) = model.data() {
        match resolve_data(encoding, request).await {
            Ok(Some(value)) => kwargs.insert(DATA_KWARG, value),
            Ok(None) => {}
            Err(DispatchError::Serialization(e)) => {
                return Err(DispatchError::client(format!("Invalid request data: {e}")));
            }
            Err(e) => return Err(e),
        }
    }

    if model.has_body() {
        kwargs.insert(BODY_KWARG, request.body().await?);
    }

    let mut cleanup = CleanupGroup::new();
    for (index, batch) in model.dependency_batches().iter().enumerate() {
        tracing::trace!(
            request_id = %request.request_id(),
            batch = index,
            size = batch.len(),
            "Resolving dependency batch"
        );
        let snapshot = kwargs.clone();
        let results = join_all(
            batch
                .iter()
                .map(|dep| dep.provide(request.clone(), snapshot.clone())),
        )
        .await;

        let mut first_error = None;
        for (dep, result) in batch.iter().zip(results) {
            match result {
                Ok(provided) => {
                    let (value, release) = provided.into_parts();
                    if let Some(release) = release {
                        cleanup.push_action(dep.key(), release);
                    }
                    kwargs.insert(dep.key(), value);
                }
                Err(e) => {
                    tracing::debug!(
                        request_id = %request.request_id(),
                        dependency = %dep.key(),
                        error = %e,
                        "Dependency provider failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(cleanup.fail_with(err).await);
        }
    }

    match signature.parse(request, kwargs) {
        Ok(kwargs) => Ok((kwargs, cleanup)),
        Err(e) => Err(cleanup.fail_with(e.into()).await),
    }
}

/// Raw values for plain parameters. Absent ones are left out for the signature to judge.
fn extract_params(model: &KwargsModel, request: &Request) -> Kwargs {
    let mut kwargs = Kwargs::new();
    for spec in model.params() {
        let name = spec.lookup_name();
        let raw = match spec.source {
            ParamSource::Path => request.path_param(&name),
            ParamSource::Query => request.query(&name),
            ParamSource::Header => request.header(&name),
            ParamSource::Cookie => request.cookie(&name),
        };
        if let Some(raw) = raw {
            kwargs.insert(spec.name.clone(), raw);
        }
    }
    kwargs
}

/// Decode the `data` kwarg. `None` when the body is empty.
async fn resolve_data(encoding: DataEncoding, request: &Request) -> Result<Option<Value>, DispatchError> {
    if request.body().await?.is_empty() {
        return Ok(None);
    }
    match encoding {
        DataEncoding::Json => Ok(Some(Value::Json(request.json().await?))),
        DataEncoding::UrlEncoded | DataEncoding::MultiPart => Ok(Some(Value::Form(request.form().await?))),
    }
}
