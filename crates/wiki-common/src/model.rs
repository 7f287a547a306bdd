use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Public article URL prefix; titles are appended with spaces turned into underscores.
pub const ARTICLE_BASE_URL: &str = "https://en.wikipedia.org/wiki/";

/// A Wikipedia search hit as handed to callers and to the relevance scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Article {
    /// Article title, e.g. "King penguin"
    pub title: String,
    /// Canonical article URL derived from the title
    pub url: String,
    /// Search snippet (may contain upstream highlight markup)
    pub snippet: String,
}

impl Article {
    pub fn from_search_hit(title: impl Into<String>, snippet: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            url: article_url(&title),
            title,
            snippet: snippet.into(),
        }
    }
}

/// An article together with its relevance to the searched topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoredArticle {
    #[serde(flatten)]
    pub article: Article,
    /// Always within [0.0, 1.0]
    pub relevance_score: f64,
}

/// Plain-text article body returned by a title lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArticleDetail {
    pub title: String,
    pub url: String,
    pub extract: String,
    /// Upstream `touched` timestamp
    pub lastmodified: String,
}

pub fn article_url(title: &str) -> String {
    format!("{ARTICLE_BASE_URL}{}", title.replace(' ', "_"))
}
