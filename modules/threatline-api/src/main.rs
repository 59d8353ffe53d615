use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use llm_client::{CompletionService, OpenAiCompletions};
use threatline_common::Config;
use threatline_digest::{DigestPipeline, ResendMailer, Scheduler};
use threatline_enrich::CveEnricher;
use threatline_exposure::ExposureEngine;
use threatline_scraper::{FeedScraper, ScrapeCache};
use threatline_store::Store;

mod auth;
mod routes;

use auth::JwtService;

pub struct AppState {
    pub store: Store,
    pub pipeline: Arc<DigestPipeline>,
    pub exposure: ExposureEngine,
    pub jwt: JwtService,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("threatline=info".parse()?),
        )
        .init();

    let config = Config::from_env();
    config.log_redacted();

    let store = Store::connect(&config.database_url).await?;
    store.migrate().await?;

    let cache = Arc::new(ScrapeCache::new());
    let scraper = Arc::new(FeedScraper::new(cache));
    let enricher = Arc::new(CveEnricher::new(config.nvd_api_key.clone()));

    let llm: Option<Arc<dyn CompletionService>> = if config.openai_api_key.is_empty() {
        info!("OPENAI_API_KEY absent: briefings and summaries disabled");
        None
    } else {
        Some(Arc::new(OpenAiCompletions::new(&config.openai_api_key)))
    };

    let pipeline = Arc::new(DigestPipeline::new(
        store.clone(),
        scraper.clone(),
        enricher,
        llm,
    ));

    let email = match &config.resend_api_key {
        Some(key) => Some(Arc::new(ResendMailer::new(key, "digest@threatline.io"))
            as Arc<dyn threatline_digest::EmailSender>),
        None => {
            info!("RESEND_API_KEY absent: digest email disabled");
            None
        }
    };

    let scheduler = Scheduler::new(
        store.clone(),
        pipeline.clone(),
        scraper.clone(),
        email,
        config.frontend_url.clone(),
    );
    tokio::spawn(async move { scheduler.run().await });

    let state = Arc::new(AppState {
        store: store.clone(),
        pipeline,
        exposure: ExposureEngine::new(store),
        jwt: JwtService::new(&config.jwt_secret),
    });

    let app = Router::new()
        .route("/", get(routes::health))
        .route("/api/digest/run", post(routes::run_digest))
        .route("/api/feed/briefs", get(routes::feed_briefs))
        .route("/api/reports/{period}", get(routes::period_report))
        .route("/api/exposure", get(routes::exposure_list))
        .route("/api/exposure/metrics", get(routes::exposure_metrics))
        .route("/api/exposure/{cve_id}", put(routes::update_exposure))
        .route("/api/stack", post(routes::create_stack_item))
        .route(
            "/api/stack/{item_id}",
            axum::routing::delete(routes::delete_stack_item),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!(addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
