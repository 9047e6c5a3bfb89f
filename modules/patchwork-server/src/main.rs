mod routes;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use patchwork_archive::{Extractor, Fetcher, FetcherConfig};
use patchwork_common::Config;
use patchwork_engine::{
    AgentService, Components, Coordinator, EnrichmentDispatcher, FeedConfig, HttpAgentClient,
    HttpDispatcher, LocalAgentService, NoopDispatcher, ProcessorConfig, RunTuning,
};
use patchwork_scorer::HttpScorer;
use patchwork_store::Storage;

use routes::AppState;

/// Concurrent in-flight enrichment dispatches before drops start.
const ENRICHMENT_POOL_SIZE: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("patchwork=info".parse()?))
        .init();

    info!("Patchwork discovery server starting...");

    // Load config
    let config = Config::from_env();
    config.log_redacted();

    // Connect to Postgres and run migrations
    let storage = Storage::connect(&config.database_url).await?;
    storage.migrate().await?;

    // Wire pipeline components
    let fetcher = Arc::new(Fetcher::new(FetcherConfig {
        timeout: config.fetch_timeout,
        max_body_bytes: config.max_body_bytes,
        per_host_min_spacing: config.per_host_min_spacing,
        user_agent: config.user_agent.clone(),
        respect_robots: true,
    }));
    let extractor = Arc::new(Extractor::new(config.min_text_bytes));
    let scorer = Arc::new(HttpScorer::new(&config.scorer_endpoint, &config.scorer_key));
    let agent: Arc<dyn AgentService> = if config.agent_endpoint.is_empty() {
        info!("No AGENT_ENDPOINT configured, writing memories locally");
        Arc::new(LocalAgentService::new(storage.memories()))
    } else {
        Arc::new(HttpAgentClient::new(&config.agent_endpoint))
    };
    let dispatcher: Arc<dyn EnrichmentDispatcher> = if config.enrichment_endpoint.is_empty() {
        Arc::new(NoopDispatcher)
    } else {
        Arc::new(HttpDispatcher::new(
            &config.enrichment_endpoint,
            ENRICHMENT_POOL_SIZE,
        ))
    };

    let coordinator = Coordinator::new(
        storage.clone(),
        Components {
            fetcher,
            extractor,
            scorer,
            agent,
            dispatcher,
        },
        ProcessorConfig {
            relevance_threshold: config.relevance_threshold,
            max_attempts: config.max_attempts,
            feed_max_attempts: config.feed_max_attempts,
            stuck_timeout: config.stuck_timeout,
            empty_polls_to_stop: 3,
        },
        FeedConfig {
            max_attempts: config.feed_max_attempts,
            stuck_timeout: config.stuck_timeout,
            empty_polls_to_stop: 3,
            agent_id: config.agent_id,
        },
        RunTuning {
            processor_parallelism: config.processor_parallelism,
            feed_parallelism: config.feed_parallelism,
            run_deadline: config.run_deadline,
        },
    );

    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
    });
    let app = routes::router(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = addr.as_str(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(coordinator))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then cancel active runs so workers drain cleanly.
async fn shutdown_signal(coordinator: Arc<Coordinator>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown requested, cancelling active runs");
    coordinator.cancel_all().await;
}
