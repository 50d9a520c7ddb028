//! lps-api entry point.
//!
//! Sets up tracing, connects the pool and cache, runs migrations, wires
//! middleware, starts the database change listener, and serves HTTP.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

use lps_api::{error, routes, state};
use lps_cache::Cache;
use lps_config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lps_config::load_dotenv();

    let settings = Settings::from_env()?;
    init_tracing(&settings.log_level);
    error::set_debug_mode(settings.debug);

    let pool = lps_db::connect(&settings.database_url).await?;
    lps_db::migrate(&pool).await?;

    let cache = Cache::connect(&settings.redis_url).await;
    let shared = state::AppState::new(pool.clone(), settings.clone(), cache);

    // Database change notifications drive the observer fan-out. The API
    // stays up even if the listener dies; observers just stop receiving
    // pushes until restart.
    {
        let hub = shared.hub.clone();
        let listener_pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = lps_realtime::run_listener(listener_pool, hub).await {
                error!(error = %e, "loan change listener exited");
            }
        });
    }

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_from_settings(&settings));

    let addr: std::net::SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {:?}", settings.bind_addr))?;
    info!("lps-api listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();
}

fn cors_from_settings(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers(tower_http::cors::Any)
}
