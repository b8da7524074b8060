//! atelier HTTP server binary.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `ATELIER_DB` — SQLite path (default: ./data/atelier.db)
//! - `ATELIER_OBJECT_ROOT` — object-store root (default: ./data/objects)
//! - `ATELIER_CDN_BASE` — public base URL for stored objects
//! - `ATELIER_SIGNING_SECRET` — HMAC secret for signed URLs
//! - `VISION_API_KEY` / `VISION_BASE_URL` / `VISION_MODEL` — vision LLM
//! - `FLUX_API_KEY` / `FLUX_BASE_URL` / `FLUX_MODEL` — image model
//! - `RUST_LOG` — tracing filter (default: "info,atelier=debug")
//!
//! Without provider keys the server falls back to the in-process stub
//! adapters, which is enough for local exploration of the full loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use atelier::config::EngineConfig;
use atelier::generation::{FluxAdapter, ImageModelAdapter, StubAdapter};
use atelier::interfaces::object_store::FsObjectStore;
use atelier::interfaces::vision::{OpenAiVisionModel, ScriptedVisionModel, VisionModel};
use atelier::server::{app_router, AppState};
use atelier::storage::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,atelier=debug".into()),
        )
        .init();

    let config = Arc::new(EngineConfig::from_env());
    let timeout = Duration::from_secs(config.provider_timeout_secs);

    let db_path = std::env::var("ATELIER_DB").unwrap_or_else(|_| "./data/atelier.db".into());
    let db = Database::open(&db_path).context("database open and migrate")?;

    let object_root =
        std::env::var("ATELIER_OBJECT_ROOT").unwrap_or_else(|_| "./data/objects".into());
    let cdn_base =
        std::env::var("ATELIER_CDN_BASE").unwrap_or_else(|_| "http://localhost:8080/cdn".into());
    let signing_secret = std::env::var("ATELIER_SIGNING_SECRET")
        .unwrap_or_else(|_| "dev-signing-secret".into())
        .into_bytes();
    let object_store = Arc::new(FsObjectStore::new(object_root, cdn_base, signing_secret));

    let vision: Arc<dyn VisionModel> = match std::env::var("VISION_API_KEY") {
        Ok(key) => Arc::new(OpenAiVisionModel::new(
            key,
            std::env::var("VISION_BASE_URL").ok(),
            std::env::var("VISION_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
            timeout,
        )),
        Err(_) => {
            tracing::warn!("VISION_API_KEY not set, using scripted vision stub");
            Arc::new(ScriptedVisionModel::new())
        }
    };

    let adapter: Arc<dyn ImageModelAdapter> = match std::env::var("FLUX_API_KEY") {
        Ok(key) => Arc::new(FluxAdapter::new(
            key,
            std::env::var("FLUX_BASE_URL").ok(),
            std::env::var("FLUX_MODEL").ok(),
            timeout,
        )),
        Err(_) => {
            tracing::warn!("FLUX_API_KEY not set, using in-process stub adapter");
            Arc::new(StubAdapter::new())
        }
    };
    if let Err(e) = adapter.initialize().await {
        tracing::error!(error = %e, "image adapter initialization failed");
    }

    let state = AppState::new(config, db, object_store, vision, adapter)
        .context("application state wiring")?;
    let pipeline = state.pipeline.clone();
    let app = app_router(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{port}");
    tracing::info!("atelier server starting on {bind_addr}");
    tracing::info!("  POST /ingest            — portfolio ZIP upload");
    tracing::info!("  POST /generate          — SSE generation batch");
    tracing::info!("  POST /feedback          — feedback intake");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, cancelling ingestion jobs");
            pipeline.cancel_other_jobs("");
        })
        .await
        .context("server run")?;
    Ok(())
}
