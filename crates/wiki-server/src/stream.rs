/// Streaming search aggregator.
///
/// One search request produces an ordered sequence of [`StreamEvent`]s:
/// `started`, then `ping`/`processing` in emission order, then exactly one terminal
/// `completed` or `error`. Nothing is emitted after the terminal event.
///
/// The work (Wikipedia search, then one scoring call per hit) and the heartbeat run in a
/// single future that is polled by the response body itself. Dropping the body (client
/// gone) or reaching the terminal event drops the heartbeat with it; no task outlives
/// the request.
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::{future, stream, FutureExt, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use wiki_common::model::ScoredArticle;
use wiki_common::scoring::RelevanceScorer;
use wiki_common::usage::UsageTracker;
use wiki_common::wikipedia::ArticleSearch;

use crate::error::TIMEOUT_DETAIL;

pub const ENDPOINT: &str = "search";
pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 50;
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Pause after `started` so the transport can flush the open connection.
const OPEN_DELAY: Duration = Duration::from_millis(100);
/// Pause after each `processing` event.
const EMIT_DELAY: Duration = Duration::from_millis(100);
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StreamEvent {
    Started,
    Ping,
    Processing { article: ScoredArticle },
    Completed,
    Error { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Completed | StreamEvent::Error { .. })
    }
}

/// A validated search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub topic: String,
    pub limit: usize,
    pub model: String,
}

impl SearchQuery {
    /// Trim and validate raw parameters. `limit` defaults to 5, must be at least 1 and is
    /// capped at 50; `model` defaults to "gpt-3.5-turbo".
    pub fn new(topic: &str, limit: Option<i64>, model: Option<&str>) -> Result<Self, String> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err("topic must not be empty".to_string());
        }
        let limit = match limit {
            None => DEFAULT_LIMIT,
            Some(n) if n < 1 => return Err(format!("limit must be a positive integer, got {n}")),
            Some(n) => usize::try_from(n).unwrap_or(MAX_LIMIT).min(MAX_LIMIT),
        };
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL);
        Ok(Self {
            topic: topic.to_string(),
            limit,
            model: model.to_string(),
        })
    }
}

/// Why the work half of a stream stopped early.
enum Halt {
    Failed(String),
    Disconnected,
}

#[derive(Clone)]
pub struct SearchStream {
    search: Arc<dyn ArticleSearch>,
    scorer: Arc<RelevanceScorer>,
    usage: UsageTracker,
    heartbeat: Duration,
}

impl SearchStream {
    pub fn new(
        search: Arc<dyn ArticleSearch>,
        scorer: Arc<RelevanceScorer>,
        usage: UsageTracker,
        heartbeat: Duration,
    ) -> Self {
        Self {
            search,
            scorer,
            usage,
            heartbeat,
        }
    }

    /// Event stream for one search. The returned stream drives the whole pipeline; it
    /// ends right after the terminal event and stops all work when dropped.
    pub fn events(
        &self,
        query: SearchQuery,
        deadline: Instant,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let this = self.clone();
        let driver = async move {
            this.run(query, deadline, tx).await;
            None
        };
        stream::select(rx.map(Some), driver.into_stream()).filter_map(future::ready)
    }

    async fn run(&self, query: SearchQuery, deadline: Instant, mut tx: mpsc::Sender<StreamEvent>) {
        if tx.send(StreamEvent::Started).await.is_err() {
            return;
        }
        info!(topic = %query.topic, limit = query.limit, model = %query.model, "search stream started");
        self.usage.record(ENDPOINT, &query.model, false).await;

        let outcome = {
            let mut items = tx.clone();
            let work = async {
                tokio::time::sleep(OPEN_DELAY).await;
                self.process(&query, &mut items).await
            };
            tokio::pin!(work);

            let expired = tokio::time::sleep_until(deadline);
            tokio::pin!(expired);

            let mut heartbeat =
                tokio::time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut expired => break Err(Halt::Failed(TIMEOUT_DETAIL.to_string())),
                    result = &mut work => break result,
                    _ = heartbeat.tick() => {
                        if tx.send(StreamEvent::Ping).await.is_err() {
                            break Err(Halt::Disconnected);
                        }
                    }
                }
            }
        };

        let terminal = match outcome {
            Ok(emitted) => {
                info!(topic = %query.topic, emitted, "search stream completed");
                StreamEvent::Completed
            }
            Err(Halt::Failed(message)) => {
                warn!(topic = %query.topic, error = %message, "search stream failed");
                self.usage.record(ENDPOINT, &query.model, true).await;
                StreamEvent::Error { message }
            }
            Err(Halt::Disconnected) => {
                debug!(topic = %query.topic, "client went away, search stream dropped");
                return;
            }
        };
        let _ = tx.send(terminal).await;
    }

    async fn process(
        &self,
        query: &SearchQuery,
        tx: &mut mpsc::Sender<StreamEvent>,
    ) -> Result<usize, Halt> {
        let candidates = self
            .search
            .search(&query.topic, query.limit)
            .await
            .map_err(|e| Halt::Failed(e.to_string()))?;

        let mut emitted = 0;
        for article in candidates.into_iter().take(query.limit) {
            let relevance_score = self.scorer.score(&article, &query.topic).await;
            let event = StreamEvent::Processing {
                article: ScoredArticle {
                    article,
                    relevance_score,
                },
            };
            tx.send(event).await.map_err(|_| Halt::Disconnected)?;
            emitted += 1;
            tokio::time::sleep(EMIT_DELAY).await;
        }
        Ok(emitted)
    }
}
