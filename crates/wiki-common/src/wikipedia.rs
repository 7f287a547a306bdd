/// Client for the MediaWiki `action=query` API.
///
/// Every request is preceded by a fixed courtesy delay so a burst of tool calls does not
/// hammer the public endpoint. Responses that are not 2xx or not valid JSON surface as
/// `CommonError::Upstream`; callers decide whether that aborts their work.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::CommonError;
use crate::model::{Article, ArticleDetail};

const SERVICE: &str = "wikipedia";
const DEFAULT_BASE_URL: &str = "https://en.wikipedia.org";
const SEARCH_PROPS: &str = "snippet|titlesnippet|categorysnippet";

#[derive(Clone, Debug)]
pub struct WikipediaClientConfig {
    /// Site root; the API lives at `{base_url}/w/api.php`.
    pub base_url: String,
    /// Delay applied before each upstream request.
    pub request_delay: Duration,
    pub timeout: Duration,
}

impl WikipediaClientConfig {
    /// Optional:
    /// - `WIKIPEDIA_BASE_URL` (default: "https://en.wikipedia.org")
    /// - `WIKIPEDIA_REQUEST_DELAY_MS` (default: 1000)
    /// - `WIKIPEDIA_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Self {
        let base_url = std::env::var("WIKIPEDIA_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let request_delay = std::env::var("WIKIPEDIA_REQUEST_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_secs(1));

        let timeout = std::env::var("WIKIPEDIA_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(30));

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_delay,
            timeout,
        }
    }
}

/// Full-text article search, abstracted so the streaming pipeline can run against a stub.
#[async_trait]
pub trait ArticleSearch: Send + Sync {
    /// Returns at most `limit` candidates in upstream rank order.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Article>, CommonError>;
}

#[derive(Clone)]
pub struct WikipediaClient {
    config: WikipediaClientConfig,
    http: reqwest::Client,
}

impl WikipediaClient {
    pub fn new(config: WikipediaClientConfig) -> Result<Self, CommonError> {
        let http = reqwest::Client::builder()
            .user_agent("wiki-search/0.1 (relevance search proxy)")
            .build()?;
        Ok(Self { config, http })
    }

    /// Look up a single article by exact title. Returns `None` when the page does not exist.
    pub async fn get_article(&self, title: &str) -> Result<Option<ArticleDetail>, CommonError> {
        let params = [
            ("action", "query"),
            ("prop", "extracts|info"),
            ("titles", title),
            ("format", "json"),
            ("explaintext", "1"),
            ("inprop", "url"),
        ];
        let response: PagesResponse = self.query(&params).await?;
        Ok(article_from_pages(response))
    }

    async fn query<T: DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T, CommonError> {
        tokio::time::sleep(self.config.request_delay).await;

        let url = format!("{}/w/api.php", self.config.base_url);
        let resp = self
            .http
            .get(&url)
            .query(params)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| CommonError::upstream(SERVICE, format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| CommonError::upstream(SERVICE, format!("failed to read body: {e}")))?;
        if !status.is_success() {
            return Err(CommonError::upstream(SERVICE, format!("status={status}")));
        }
        serde_json::from_slice(&body)
            .map_err(|e| CommonError::upstream(SERVICE, format!("invalid response JSON: {e}")))
    }
}

#[async_trait]
impl ArticleSearch for WikipediaClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Article>, CommonError> {
        let limit_param = limit.to_string();
        let params = [
            ("action", "query"),
            ("list", "search"),
            ("srsearch", query),
            ("srlimit", limit_param.as_str()),
            ("format", "json"),
            ("srprop", SEARCH_PROPS),
            ("srwhat", "nearmatch"),
            ("srnamespace", "0"),
            ("srredirects", "exclude"),
        ];
        let response: SearchResponse = self.query(&params).await?;
        let articles = articles_from_search(response, limit);
        info!(query, limit, hits = articles.len(), "wikipedia search complete");
        Ok(articles)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchBlock {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Default, Deserialize)]
struct PagesResponse {
    #[serde(default)]
    query: Option<PagesBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct PagesBlock {
    #[serde(default)]
    pages: HashMap<String, Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    title: String,
    #[serde(default)]
    fullurl: String,
    #[serde(default)]
    extract: String,
    #[serde(default)]
    touched: String,
    missing: Option<serde_json::Value>,
}

fn articles_from_search(response: SearchResponse, limit: usize) -> Vec<Article> {
    response
        .query
        .unwrap_or_default()
        .search
        .into_iter()
        .take(limit)
        .map(|hit| Article::from_search_hit(hit.title, hit.snippet))
        .collect()
}

fn article_from_pages(response: PagesResponse) -> Option<ArticleDetail> {
    let page = response.query?.pages.into_values().next()?;
    if page.missing.is_some() {
        debug!(title = %page.title, "wikipedia page missing");
        return None;
    }
    Some(ArticleDetail {
        title: page.title,
        url: page.fullurl,
        extract: page.extract,
        lastmodified: page.touched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_hits_become_articles_in_rank_order() {
        let body = r#"{
            "batchcomplete": "",
            "query": {
                "searchinfo": {"totalhits": 3},
                "search": [
                    {"ns": 0, "title": "King penguin", "snippet": "The <span class=\"searchmatch\">king</span> penguin"},
                    {"ns": 0, "title": "Emperor penguin", "snippet": "The emperor penguin"},
                    {"ns": 0, "title": "Penguin", "snippet": "Penguins are birds"}
                ]
            }
        }"#;
        let response: SearchResponse = serde_json::from_str(body).unwrap();
        let articles = articles_from_search(response, 2);

        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "King penguin");
        assert_eq!(articles[0].url, "https://en.wikipedia.org/wiki/King_penguin");
        assert_eq!(
            articles[0].snippet,
            "The <span class=\"searchmatch\">king</span> penguin"
        );
        assert_eq!(articles[1].title, "Emperor penguin");
    }

    #[test]
    fn response_without_query_block_is_empty() {
        let response: SearchResponse = serde_json::from_str(r#"{"batchcomplete": ""}"#).unwrap();
        assert!(articles_from_search(response, 5).is_empty());
    }

    #[test]
    fn existing_page_maps_to_detail() {
        let body = r#"{
            "query": {
                "pages": {
                    "23508": {
                        "pageid": 23508,
                        "title": "King penguin",
                        "touched": "2024-05-01T12:00:00Z",
                        "fullurl": "https://en.wikipedia.org/wiki/King_penguin",
                        "extract": "The king penguin is the second largest species of penguin."
                    }
                }
            }
        }"#;
        let response: PagesResponse = serde_json::from_str(body).unwrap();
        let detail = article_from_pages(response).unwrap();
        assert_eq!(detail.title, "King penguin");
        assert_eq!(detail.url, "https://en.wikipedia.org/wiki/King_penguin");
        assert_eq!(detail.lastmodified, "2024-05-01T12:00:00Z");
        assert!(detail.extract.starts_with("The king penguin"));
    }

    #[test]
    fn missing_page_is_none() {
        let body = r#"{"query": {"pages": {"-1": {"ns": 0, "title": "Nope penguin", "missing": ""}}}}"#;
        let response: PagesResponse = serde_json::from_str(body).unwrap();
        assert!(article_from_pages(response).is_none());
    }

    #[test]
    fn no_pages_is_none() {
        let response: PagesResponse = serde_json::from_str(r#"{"batchcomplete": ""}"#).unwrap();
        assert!(article_from_pages(response).is_none());
    }
}
