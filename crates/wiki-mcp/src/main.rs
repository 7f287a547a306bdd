mod server;

use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wiki_common::completion::{CompletionClient, CompletionClientConfig};
use wiki_common::scoring::RelevanceScorer;
use wiki_common::usage::UsageTracker;
use wiki_common::wikipedia::{WikipediaClient, WikipediaClientConfig};

use server::WikiMcpServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the MCP protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting wiki-mcp MCP server");

    let completion_config = CompletionClientConfig::from_env();
    if completion_config.api_key.is_none() {
        warn!("OPENROUTER_API_KEY is not set, relevance scoring will likely fail");
    }
    info!(
        base_url = %completion_config.base_url,
        timeout_secs = completion_config.default_timeout.as_secs(),
        "completion client configured"
    );
    let completion = Arc::new(CompletionClient::new(completion_config)?);

    let wikipedia_config = WikipediaClientConfig::from_env();
    info!(
        base_url = %wikipedia_config.base_url,
        request_delay_ms = wikipedia_config.request_delay.as_millis(),
        "wikipedia client configured"
    );
    let wikipedia = Arc::new(WikipediaClient::new(wikipedia_config)?);

    let scorer = Arc::new(RelevanceScorer::from_env(completion));
    info!(model = scorer.model(), "relevance scorer ready");

    let server = WikiMcpServer::new(wikipedia, scorer, UsageTracker::in_memory());

    info!("MCP server ready, serving on stdio");
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!(error = %e, "MCP server error");
    })?;

    service.waiting().await?;
    info!("MCP server shut down");
    Ok(())
}
