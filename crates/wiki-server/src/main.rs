use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wiki_common::completion::{CompletionClient, CompletionClientConfig, CompletionProvider};
use wiki_common::scoring::RelevanceScorer;
use wiki_common::usage::UsageTracker;
use wiki_common::wikipedia::{WikipediaClient, WikipediaClientConfig};

use wiki_server::config::Config;
use wiki_server::governor::Governor;
use wiki_server::server::{create_router, AppState};
use wiki_server::stream::SearchStream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real deployments set the environment directly.
    let dotenv = dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!(dotenv = dotenv.is_some(), "starting wiki-server");

    // 1. Load config from environment
    let config = Config::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        request_timeout_secs = config.request_timeout.as_secs(),
        keepalive_timeout_secs = config.keepalive_timeout.as_secs(),
        max_connections = config.max_connections,
        stats_file = %config.stats_file.display(),
        "configuration loaded"
    );

    // 2. Upstream clients
    let completion_config = CompletionClientConfig::from_env();
    if completion_config.api_key.is_none() {
        warn!("OPENROUTER_API_KEY is not set, completion requests will be unauthenticated");
    }
    info!(
        base_url = %completion_config.base_url,
        timeout_secs = completion_config.default_timeout.as_secs(),
        "completion client configured"
    );
    let completion: Arc<dyn CompletionProvider> = Arc::new(CompletionClient::new(completion_config)?);

    let wikipedia_config = WikipediaClientConfig::from_env();
    info!(
        base_url = %wikipedia_config.base_url,
        request_delay_ms = wikipedia_config.request_delay.as_millis(),
        "wikipedia client configured"
    );
    let wikipedia = Arc::new(WikipediaClient::new(wikipedia_config)?);

    let scorer = Arc::new(RelevanceScorer::from_env(Arc::clone(&completion)));
    info!(model = scorer.model(), "relevance scorer ready");

    // 3. Usage counters, flushed in the background and once more on shutdown
    let usage = UsageTracker::load(&config.stats_file).await;
    let flusher = usage.spawn_flusher(config.stats_flush_interval);

    // 4. Router
    let search = SearchStream::new(wikipedia, scorer, usage.clone(), config.heartbeat_interval());
    let state = AppState::new(completion, search, usage.clone());
    let app = create_router(state, Governor::from_config(&config));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(listen_addr = %config.bind_addr, "HTTP server ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Wait for the flusher to stop so the final flush is the only writer.
    flusher.abort();
    let _ = flusher.await;
    usage.flush().await?;
    info!("wiki-server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
