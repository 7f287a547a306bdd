/// Request governor middleware.
///
/// `enforce_timeout` bounds every request by `SERVER_TIMEOUT`: a handler that has not
/// produced a response by then is dropped and the client gets a 504. Streaming handlers
/// commit their headers immediately, so the same deadline is handed to them as a
/// [`Deadline`] request extension and they finish the stream themselves.
///
/// `keep_alive_headers` is layered separately on the search routes only.
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;
use tracing::warn;

use crate::config::Config;
use crate::error::ApiError;

/// Instant by which the current request must be finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(pub Instant);

#[derive(Debug, Clone)]
pub struct Governor {
    pub request_timeout: Duration,
    pub keepalive_timeout: Duration,
}

impl Governor {
    pub fn new(request_timeout: Duration, keepalive_timeout: Duration) -> Self {
        Self {
            request_timeout,
            keepalive_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.request_timeout, config.keepalive_timeout)
    }
}

pub async fn enforce_timeout(
    State(governor): State<Governor>,
    mut req: Request,
    next: Next,
) -> Response {
    let deadline = Instant::now() + governor.request_timeout;
    req.extensions_mut().insert(Deadline(deadline));
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match tokio::time::timeout_at(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(
                %method,
                path,
                timeout_secs = governor.request_timeout.as_secs_f64(),
                "request timed out"
            );
            ApiError::Timeout.into_response()
        }
    }
}

pub async fn keep_alive_headers(
    State(governor): State<Governor>,
    req: Request,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    let value = format!("timeout={}", governor.keepalive_timeout.as_secs());
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static("keep-alive"), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{middleware, Extension, Router};
    use tower::ServiceExt;

    use super::*;

    fn governed(timeout: Duration) -> Router {
        let governor = Governor::new(timeout, Duration::from_secs(60));
        let search = Router::new()
            .route("/search", get(|| async { "streaming" }))
            .route_layer(middleware::from_fn_with_state(
                governor.clone(),
                keep_alive_headers,
            ));
        Router::new()
            .route("/hang", get(|| std::future::pending::<&'static str>()))
            .route("/quick", get(|| async { "ok" }))
            .route(
                "/deadline",
                get(|Extension(Deadline(at)): Extension<Deadline>| async move {
                    let left = at.saturating_duration_since(Instant::now());
                    left.as_secs().to_string()
                }),
            )
            .merge(search)
            .layer(middleware::from_fn_with_state(governor, enforce_timeout))
    }

    fn get_request(path: &str) -> Request {
        axum::http::Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_handler_gets_fixed_timeout_body() {
        let timeout = Duration::from_secs(5);
        let started = Instant::now();

        let response = governed(timeout).oneshot(get_request("/hang")).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(elapsed >= timeout, "returned early after {elapsed:?}");
        assert!(
            elapsed < timeout + Duration::from_millis(50),
            "returned late after {elapsed:?}"
        );
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"detail": "Request timeout"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fast_handler_passes_through() {
        let response = governed(Duration::from_secs(5))
            .oneshot(get_request("/quick"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_see_the_deadline() {
        let response = governed(Duration::from_secs(300))
            .oneshot(get_request("/deadline"))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let remaining: u64 = std::str::from_utf8(&bytes).unwrap().parse().unwrap();
        assert!(remaining >= 299 && remaining <= 300, "remaining={remaining}");
    }

    #[tokio::test]
    async fn keep_alive_headers_only_on_search() {
        let app = governed(Duration::from_secs(5));

        let search = app.clone().oneshot(get_request("/search")).await.unwrap();
        assert_eq!(search.headers()[header::CONNECTION], "keep-alive");
        assert_eq!(search.headers()["keep-alive"], "timeout=60");

        let other = app.oneshot(get_request("/quick")).await.unwrap();
        assert!(other.headers().get("keep-alive").is_none());
    }
}
