use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::error;

use wiki_common::model::Article;
use wiki_common::usage::UsageStats;

use crate::error::ApiError;
use crate::governor::Deadline;
use crate::server::AppState;
use crate::stream::{SearchQuery, DEFAULT_MODEL};

/// Search parameters, from the query string or (legacy) a JSON body. Unknown legacy
/// fields such as `include_images` are ignored.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub topic: String,
    pub limit: Option<i64>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArticleRequest {
    pub article: Article,
    pub model: Option<String>,
}

impl ArticleRequest {
    fn model(&self) -> &str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub relevance: String,
    pub article: Article,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub analysis: String,
    pub article: Article,
}

pub async fn search(
    State(state): State<AppState>,
    Extension(Deadline(deadline)): Extension<Deadline>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    stream_search(&state, params, deadline)
}

/// `POST /search` with a JSON body, translated into the query-string contract.
pub async fn search_legacy(
    State(state): State<AppState>,
    Extension(Deadline(deadline)): Extension<Deadline>,
    payload: Result<Json<SearchParams>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(params) = payload?;
    stream_search(&state, params, deadline)
}

fn stream_search(
    state: &AppState,
    params: SearchParams,
    deadline: Instant,
) -> Result<Response, ApiError> {
    let query = SearchQuery::new(&params.topic, params.limit, params.model.as_deref())
        .map_err(ApiError::bad_request)?;
    let events = state
        .search
        .events(query, deadline)
        .map(|event| Event::default().json_data(event));

    Ok((
        [
            (header::CONNECTION, "keep-alive"),
            (header::TRANSFER_ENCODING, "chunked"),
        ],
        Sse::new(events),
    )
        .into_response())
}

pub async fn evaluate(
    State(state): State<AppState>,
    payload: Result<Json<ArticleRequest>, JsonRejection>,
) -> Result<Json<EvaluateResponse>, ApiError> {
    let Json(request) = payload?;
    let prompt = format!(
        "Evaluate the relevance of this article to the topic: {}\n\n{}",
        request.article.title, request.article.snippet
    );
    let relevance = complete(&state, "evaluate", request.model(), &prompt).await?;
    Ok(Json(EvaluateResponse {
        relevance,
        article: request.article,
    }))
}

pub async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<ArticleRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let Json(request) = payload?;
    let prompt = format!(
        "Analyze this article and provide key insights: {}\n\n{}",
        request.article.title, request.article.snippet
    );
    let analysis = complete(&state, "analyze", request.model(), &prompt).await?;
    Ok(Json(AnalyzeResponse {
        analysis,
        article: request.article,
    }))
}

pub async fn stats(State(state): State<AppState>) -> Json<UsageStats> {
    Json(state.usage.snapshot().await)
}

async fn complete(
    state: &AppState,
    endpoint: &str,
    model: &str,
    prompt: &str,
) -> Result<String, ApiError> {
    state.usage.record(endpoint, model, false).await;
    match state.completion.complete(model, prompt).await {
        Ok(text) => Ok(text),
        Err(e) => {
            error!(endpoint, model, error = %e, "completion failed");
            state.usage.record(endpoint, model, true).await;
            Err(ApiError::Internal(e.to_string()))
        }
    }
}
