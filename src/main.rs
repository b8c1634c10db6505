mod config;
mod error;
mod fetcher;
mod gateway;
mod gemini;
mod models;
mod orchestrator;
mod prompt;
mod routes;
mod storage;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{CorsLayer, Any};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    config::Settings,
    fetcher::{AssetFetcher, HttpImageSource},
    gateway::ProviderGateway,
    gemini::GeminiAdapter,
    orchestrator::GenerationOrchestrator,
    routes::AppState,
    storage::{ResultPersister, SupabaseStorage},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let settings = Settings::from_env().context("invalid configuration")?;
    tracing::info!(
        "Primary {} ({}), fallback {} ({}), default {}",
        settings.banana_pro_model,
        if settings.banana_pro_api_key.is_some() { "configured" } else { "no key" },
        settings.gemini_model,
        if settings.gemini_api_key.is_some() { "configured" } else { "no key" },
        settings.default_ai_service,
    );

    let source = HttpImageSource::new(settings.fetch_timeout).context("building download client")?;
    let primary = GeminiAdapter::primary(&settings).context("building primary provider")?;
    let fallback = GeminiAdapter::fallback(&settings).context("building fallback provider")?;
    let storage = SupabaseStorage::new(
        settings.supabase_url.clone(),
        settings.supabase_service_key.clone(),
        settings.storage_bucket.clone(),
    );
    let storage_configured = storage.is_configured();
    if !storage_configured {
        tracing::warn!("⚠️ SUPABASE_URL / SUPABASE_SERVICE_KEY not set, generated images cannot be stored");
    }

    let orchestrator = GenerationOrchestrator::new(
        AssetFetcher::new(Arc::new(source)),
        ProviderGateway::new(Arc::new(primary), Arc::new(fallback)),
        ResultPersister::new(Arc::new(storage)),
        settings.default_ai_service,
    )
    .with_deadline(settings.generation_timeout);

    let state = AppState {
        store: Arc::default(),
        orchestrator: Arc::new(orchestrator),
        storage_configured,
    };

    let app = routes::router(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    );

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", settings.host, settings.port))?;
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
