use std::sync::Arc;

use rmcp::{
    Json, RoleServer, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    service::RequestContext,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use wiki_common::model::{Article, ArticleDetail, ScoredArticle};
use wiki_common::scoring::RelevanceScorer;
use wiki_common::usage::{UsageStats, UsageTracker};
use wiki_common::wikipedia::{ArticleSearch, WikipediaClient};

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 50;
const RESOURCE_SCHEME: &str = "wiki://";
const NOT_FOUND: &str = "article not found";

#[derive(Clone)]
pub struct WikiMcpServer {
    wikipedia: Arc<WikipediaClient>,
    scorer: Arc<RelevanceScorer>,
    usage: UsageTracker,
    tool_router: ToolRouter<WikiMcpServer>,
}

impl WikiMcpServer {
    pub fn new(
        wikipedia: Arc<WikipediaClient>,
        scorer: Arc<RelevanceScorer>,
        usage: UsageTracker,
    ) -> Self {
        Self {
            wikipedia,
            scorer,
            usage,
            tool_router: Self::tool_router(),
        }
    }

    async fn track<T>(&self, tool: &str, model: &str, result: Result<T, String>) -> Result<T, String> {
        let endpoint = format!("mcp:{tool}");
        self.usage.record(&endpoint, model, false).await;
        if let Err(e) = &result {
            warn!(tool, error = %e, "tool call failed");
            self.usage.record(&endpoint, model, true).await;
        }
        result
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchArticlesParams {
    /// Free-text search phrase
    query: String,
    /// Maximum number of articles (default 5, at most 50)
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetArticleParams {
    title: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EvaluateRelevanceParams {
    article_title: String,
    article_snippet: String,
    search_phrase: String,
}

#[derive(Debug, Serialize, JsonSchema)]
struct SearchArticlesResponse {
    articles: Vec<ScoredArticle>,
}

#[derive(Debug, Serialize, JsonSchema)]
struct ScoreResponse {
    score: f64,
}

fn non_empty(value: &str, field: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(value.to_string())
}

fn bounded_limit(limit: Option<usize>) -> Result<usize, String> {
    match limit {
        None => Ok(DEFAULT_LIMIT),
        Some(0) => Err("limit must be at least 1".to_string()),
        Some(n) => Ok(n.min(MAX_LIMIT)),
    }
}

/// A readable resource address: `wiki://{title}` or `wiki://search/{query}`.
#[derive(Debug, PartialEq)]
enum WikiResource {
    Article(String),
    Search(String),
}

fn parse_resource_uri(uri: &str) -> Result<WikiResource, String> {
    let path = uri
        .strip_prefix(RESOURCE_SCHEME)
        .ok_or_else(|| format!("invalid resource URI: {uri}"))?;
    match path.strip_prefix("search/") {
        Some(query) => Ok(WikiResource::Search(non_empty(query, "query")?)),
        None => Ok(WikiResource::Article(non_empty(path, "title")?)),
    }
}

fn resource_templates() -> Result<Vec<ResourceTemplate>, serde_json::Error> {
    serde_json::from_value(json!([
        {
            "uriTemplate": "wiki://{title}",
            "name": "article",
            "description": "Access Wikipedia article by title",
            "mimeType": "application/json"
        },
        {
            "uriTemplate": "wiki://search/{query}",
            "name": "search",
            "description": "Search Wikipedia articles, scored for relevance",
            "mimeType": "application/json"
        }
    ]))
}

impl WikiMcpServer {
    /// Serve a resource through the matching tool so counters and validation are shared.
    async fn fetch_resource(&self, resource: WikiResource) -> Result<String, String> {
        let body = match resource {
            WikiResource::Article(title) => {
                let Json(article) = self.get_article(Parameters(GetArticleParams { title })).await?;
                serde_json::to_string_pretty(&article)
            }
            WikiResource::Search(query) => {
                let Json(found) = self
                    .search_articles(Parameters(SearchArticlesParams { query, limit: None }))
                    .await?;
                serde_json::to_string_pretty(&found)
            }
        };
        body.map_err(|e| format!("failed to encode resource: {e}"))
    }
}

#[tool_router]
impl WikiMcpServer {
    #[tool(description = "Search Wikipedia for a phrase and score each hit's relevance from 0.0 to 1.0. Returns up to `limit` articles in search order.")]
    async fn search_articles(
        &self,
        Parameters(params): Parameters<SearchArticlesParams>,
    ) -> Result<Json<SearchArticlesResponse>, String> {
        let result = async {
            let query = non_empty(&params.query, "query")?;
            let limit = bounded_limit(params.limit)?;
            let hits = self
                .wikipedia
                .search(&query, limit)
                .await
                .map_err(|e| format!("search failed: {e}"))?;

            let mut articles = Vec::with_capacity(hits.len());
            for article in hits {
                let relevance_score = self.scorer.score(&article, &query).await;
                articles.push(ScoredArticle {
                    article,
                    relevance_score,
                });
            }
            Ok::<_, String>(SearchArticlesResponse { articles })
        }
        .await;

        self.track("search_articles", self.scorer.model(), result)
            .await
            .map(Json)
    }

    #[tool(description = "Fetch the plain-text introduction and last-modified time of a Wikipedia article by exact title.")]
    async fn get_article(
        &self,
        Parameters(params): Parameters<GetArticleParams>,
    ) -> Result<Json<ArticleDetail>, String> {
        let result = async {
            let title = non_empty(&params.title, "title")?;
            self.wikipedia
                .get_article(&title)
                .await
                .map_err(|e| format!("get_article failed: {e}"))?
                .ok_or_else(|| format!("{NOT_FOUND}: {title}"))
        }
        .await;

        self.track("get_article", "wikipedia", result).await.map(Json)
    }

    #[tool(description = "Score how relevant an article (title + snippet) is to a search phrase. Returns a score from 0.0 to 1.0; 0.0 when the model's reply is unusable.")]
    async fn evaluate_relevance(
        &self,
        Parameters(params): Parameters<EvaluateRelevanceParams>,
    ) -> Result<Json<ScoreResponse>, String> {
        let result = async {
            let title = non_empty(&params.article_title, "article_title")?;
            let phrase = non_empty(&params.search_phrase, "search_phrase")?;
            let article = Article::from_search_hit(title, params.article_snippet);
            let score = self.scorer.score(&article, &phrase).await;
            Ok::<_, String>(ScoreResponse { score })
        }
        .await;

        self.track("evaluate_relevance", self.scorer.model(), result)
            .await
            .map(Json)
    }

    #[tool(description = "Get request counters (total, per tool, per model, errors) for this MCP session.")]
    async fn get_usage_stats(&self) -> Result<Json<UsageStats>, String> {
        Ok(Json(self.usage.snapshot().await))
    }
}

#[tool_handler]
impl ServerHandler for WikiMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "wiki-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Wikipedia research MCP server. Use search_articles to find and rank articles for a \
phrase, get_article to read an article's introduction, and evaluate_relevance to score a single \
title/snippet pair. Articles and searches are also readable as resources: wiki://{title} and \
wiki://search/{query}. Counters are available via get_usage_stats."
                    .to_string(),
            ),
        }
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, ErrorData> {
        let templates = resource_templates()
            .map_err(|e| ErrorData::internal_error(format!("resource templates: {e}"), None))?;
        Ok(ListResourceTemplatesResult::with_all_items(templates))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let uri = request.uri;
        let resource = parse_resource_uri(&uri)
            .map_err(|e| ErrorData::invalid_params(e, Some(json!({ "uri": uri }))))?;
        match self.fetch_resource(resource).await {
            Ok(text) => Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(text, uri)],
            }),
            Err(e) if e.starts_with(NOT_FOUND) => Err(ErrorData::resource_not_found(
                e,
                Some(json!({ "uri": uri })),
            )),
            Err(e) => Err(ErrorData::internal_error(e, Some(json!({ "uri": uri })))),
        }
    }
}
