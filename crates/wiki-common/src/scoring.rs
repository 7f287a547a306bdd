/// LLM-backed relevance scoring of one article against a topic.
///
/// Scoring is best-effort: transport failures, upstream errors and replies without a
/// parseable `SCORE:` line all degrade to 0.0 with a warning. Nothing here propagates
/// an error to the caller, so one bad completion never aborts a search.
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::completion::CompletionProvider;
use crate::model::Article;

/// Model used for scoring unless `SCORING_MODEL` overrides it. Callers' model choices
/// apply to free-form evaluate/analyze requests only.
pub const DEFAULT_SCORING_MODEL: &str = "mistralai/mistral-7b-instruct";

static SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SCORE:\s*([0-9.]+)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreParseError {
    #[error("reply has no SCORE: token")]
    MissingScore,

    #[error("unparseable score value: {0:?}")]
    InvalidNumber(String),
}

pub struct RelevanceScorer {
    provider: Arc<dyn CompletionProvider>,
    model: String,
}

impl RelevanceScorer {
    pub fn new(provider: Arc<dyn CompletionProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Uses `SCORING_MODEL` when set, otherwise [`DEFAULT_SCORING_MODEL`].
    pub fn from_env(provider: Arc<dyn CompletionProvider>) -> Self {
        let model = std::env::var("SCORING_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SCORING_MODEL.to_string());
        Self::new(provider, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Score `article` against `topic`. Always returns a value in [0.0, 1.0].
    pub async fn score(&self, article: &Article, topic: &str) -> f64 {
        let prompt = build_prompt(topic, article);
        let reply = match self.provider.complete(&self.model, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, title = %article.title, model = %self.model, "relevance scoring failed");
                return 0.0;
            }
        };
        match parse_score(&reply) {
            Ok(score) => {
                debug!(title = %article.title, score, "article scored");
                score
            }
            Err(e) => {
                warn!(error = %e, title = %article.title, "unusable scoring reply");
                0.0
            }
        }
    }
}

pub fn build_prompt(topic: &str, article: &Article) -> String {
    format!(
        "You are an expert evaluator tasked with precisely assessing the relevance of a \
Wikipedia article to a given search phrase.

### Search Phrase:
{topic}

### Wikipedia Article:
- **Title:** {title}
- **Snippet:** {snippet}

### Strict Evaluation Criteria:
- SCORE 0.9-1.0: Article is exactly about the search phrase, highly specific, and directly matches.
- SCORE 0.7-0.8: Article strongly related but broader or less specific.
- SCORE 0.4-0.6: Moderately related, mentions key concepts briefly.
- SCORE 0.1-0.3: Loosely related, minimal relevance.
- SCORE 0.0: Not relevant or off-topic.

### Your Task:
Provide the exact numeric SCORE according to the criteria above, followed by a concise REASON (one sentence).

### Output (strictly follow this format):
SCORE: [0.0-1.0]
REASON: [one concise sentence]
",
        title = article.title,
        snippet = article.snippet,
    )
}

/// Extract the first number following `SCORE:` and clamp it into [0.0, 1.0].
///
/// A sentence-final period after the number ("SCORE: 0.8.") is tolerated.
pub fn parse_score(reply: &str) -> Result<f64, ScoreParseError> {
    let raw = SCORE_RE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or(ScoreParseError::MissingScore)?;
    let value: f64 = raw
        .trim_end_matches('.')
        .parse()
        .map_err(|_| ScoreParseError::InvalidNumber(raw.to_string()))?;
    Ok(value.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::completion::CompletionClientError;

    struct FixedReply(Result<String, ()>);

    #[async_trait]
    impl CompletionProvider for FixedReply {
        async fn complete(&self, _model: &str, _prompt: &str) -> Result<String, CompletionClientError> {
            self.0
                .clone()
                .map_err(|_| CompletionClientError::MissingContent)
        }
    }

    fn scorer(reply: Result<&str, ()>) -> RelevanceScorer {
        RelevanceScorer::new(
            Arc::new(FixedReply(reply.map(str::to_string))),
            DEFAULT_SCORING_MODEL,
        )
    }

    fn king_penguin() -> Article {
        Article::from_search_hit(
            "King penguin",
            "The king penguin is the second largest species of penguin.",
        )
    }

    #[test]
    fn parses_two_line_reply() {
        let reply = "SCORE: 0.85\nREASON: The article is about king penguins.";
        assert_eq!(parse_score(reply), Ok(0.85));
    }

    #[test]
    fn takes_first_score_token() {
        let reply = "Thinking...\nSCORE:0.4\nREASON: broad.\nSCORE: 0.9";
        assert_eq!(parse_score(reply), Ok(0.4));
    }

    #[test]
    fn tolerates_trailing_period() {
        assert_eq!(parse_score("SCORE: 0.7."), Ok(0.7));
    }

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(parse_score("SCORE: 7"), Ok(1.0));
        assert_eq!(parse_score("SCORE: 1.5\nREASON: very relevant"), Ok(1.0));
    }

    #[test]
    fn missing_token_is_parse_error() {
        assert_eq!(
            parse_score("This article is highly relevant."),
            Err(ScoreParseError::MissingScore)
        );
        assert_eq!(
            parse_score("score: 0.9"),
            Err(ScoreParseError::MissingScore)
        );
    }

    #[test]
    fn garbage_number_is_parse_error() {
        assert_eq!(
            parse_score("SCORE: 0.8.1"),
            Err(ScoreParseError::InvalidNumber("0.8.1".to_string()))
        );
    }

    #[test]
    fn prompt_embeds_topic_article_and_rubric() {
        let prompt = build_prompt("king penguin species", &king_penguin());
        assert!(prompt.contains("### Search Phrase:\nking penguin species"));
        assert!(prompt.contains("- **Title:** King penguin"));
        assert!(prompt.contains("second largest species of penguin"));
        for band in ["0.9-1.0", "0.7-0.8", "0.4-0.6", "0.1-0.3", "SCORE 0.0:"] {
            assert!(prompt.contains(band), "missing rubric band {band}");
        }
        assert!(prompt.contains("SCORE: [0.0-1.0]\nREASON: [one concise sentence]"));
    }

    #[test]
    fn prompt_is_deterministic() {
        let a = build_prompt("penguins", &king_penguin());
        let b = build_prompt("penguins", &king_penguin());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn scorer_returns_parsed_value() {
        let score = scorer(Ok("SCORE: 0.8\nREASON: close match."))
            .score(&king_penguin(), "king penguin species")
            .await;
        assert_eq!(score, 0.8);
    }

    #[tokio::test]
    async fn scorer_degrades_to_zero_without_score_token() {
        let score = scorer(Ok("I think it is quite relevant."))
            .score(&king_penguin(), "king penguin species")
            .await;
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn scorer_degrades_to_zero_on_upstream_failure() {
        let score = scorer(Err(()))
            .score(&king_penguin(), "king penguin species")
            .await;
        assert_eq!(score, 0.0);
    }
}
