//! The `OPTIONS` handler synthesized for routes that do not declare one.

use axum::http::Method;

use crate::error::{BuildError, DispatchError};
use crate::handlers::handler::{Handler, Payload};
use crate::observability::metrics;
use crate::security::cors::negotiate_preflight;

/// Build the preflight negotiator for a route serving `route_methods`.
///
/// It reads the CORS policy from the request's application context, never
/// shows up in schema listings and always runs inline.
pub fn options_handler(route_methods: Vec<Method>) -> Result<Handler, BuildError> {
    Handler::options("options_handler")
        .include_in_schema(false)
        .to_sync(move |request, _| {
            let outcome = negotiate_preflight(
                request.context().cors.as_deref(),
                request.headers(),
                &route_methods,
            );
            metrics::record_preflight(outcome.label());
            tracing::debug!(
                request_id = %request.request_id(),
                path = %request.path(),
                outcome = outcome.label(),
                "Preflight negotiated"
            );
            Ok::<_, DispatchError>(Payload::Response(outcome.into_response()))
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppContext;
    use crate::config::CorsConfig;
    use crate::handlers::handler::ExecutionMode;
    use crate::handlers::kwargs::Kwargs;
    use crate::http::message::BufferedReceiver;
    use crate::http::scope::Scope;
    use crate::http::Request;
    use crate::security::cors::CorsPolicy;
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use std::sync::Arc;

    fn request(context: AppContext, headers: HeaderMap) -> Request {
        Request::new(
            Scope::new(Method::OPTIONS, "/items").with_headers(headers),
            Arc::new(BufferedReceiver::default()),
            Arc::new(context),
            "options_handler",
        )
    }

    #[test]
    fn test_synthesized_handler_shape() {
        let handler = options_handler(vec![Method::GET]).unwrap();
        assert_eq!(handler.methods(), &[Method::OPTIONS]);
        assert!(!handler.include_in_schema());
        assert_eq!(handler.mode(), ExecutionMode::Inline);
    }

    #[tokio::test]
    async fn test_no_origin_lists_allowed_methods() {
        let handler = options_handler(vec![Method::POST, Method::GET]).unwrap();
        let req = request(AppContext::default(), HeaderMap::new());

        let payload = handler.invoke(&req, Kwargs::new()).await.unwrap();
        let Payload::Response(response) = payload else {
            panic!("expected a response payload");
        };
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.header("allow"), Some("GET, OPTIONS, POST"));
    }

    #[tokio::test]
    async fn test_uses_context_policy() {
        let mut context = AppContext::default();
        context.cors = Some(Arc::new(
            CorsPolicy::from_config(&CorsConfig {
                allow_origins: vec!["https://app.example".into()],
                ..CorsConfig::default()
            })
            .unwrap(),
        ));
        let mut headers = HeaderMap::new();
        headers.insert("origin", HeaderValue::from_static("https://evil.example"));

        let handler = options_handler(vec![Method::GET]).unwrap();
        let payload = handler.invoke(&request(context, headers), Kwargs::new()).await.unwrap();
        let Payload::Response(response) = payload else {
            panic!("expected a response payload");
        };
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body().as_ref(), b"Disallowed CORS Origin");
    }
}
