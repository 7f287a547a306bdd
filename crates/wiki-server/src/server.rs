/// HTTP surface of the wiki search service.
///
/// Routes:
/// - `GET /search` (and the legacy `POST /search`): streaming relevance search
/// - `POST /evaluate`, `POST /analyze`: one free-form completion about an article
/// - `GET /stats`: usage counters
///
/// Every route runs under the request governor; the search routes additionally carry
/// keep-alive headers.
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use wiki_common::completion::CompletionProvider;
use wiki_common::usage::UsageTracker;

use crate::governor::{enforce_timeout, keep_alive_headers, Governor};
use crate::routes;
use crate::stream::SearchStream;

#[derive(Clone)]
pub struct AppState {
    pub completion: Arc<dyn CompletionProvider>,
    pub search: SearchStream,
    pub usage: UsageTracker,
}

impl AppState {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        search: SearchStream,
        usage: UsageTracker,
    ) -> Self {
        Self {
            completion,
            search,
            usage,
        }
    }
}

pub fn create_router(state: AppState, governor: Governor) -> Router {
    let search = Router::new()
        .route("/search", get(routes::search).post(routes::search_legacy))
        .route_layer(middleware::from_fn_with_state(
            governor.clone(),
            keep_alive_headers,
        ));

    Router::new()
        .route("/evaluate", post(routes::evaluate))
        .route("/analyze", post(routes::analyze))
        .route("/stats", get(routes::stats))
        .merge(search)
        .layer(middleware::from_fn_with_state(governor, enforce_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
