use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    blob_store::BlobStore,
    registry::FileRegistry,
    relay_service::{EXHAUSTED_DELETE_GRACE, RelayConfig, RelayService},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::load()?;

    tracing::info!("Starting file-relay with config: {:?}", cfg);

    // --- Ensure upload directory exists ---
    if !Path::new(&cfg.upload_dir).exists() {
        fs::create_dir_all(&cfg.upload_dir)?;
        tracing::info!("Created upload directory at {}", cfg.upload_dir);
    }

    // --- Initialize core services ---
    let registry = Arc::new(FileRegistry::new());
    let blobs = BlobStore::new(&cfg.upload_dir);
    let relay = RelayService::new(
        registry,
        blobs,
        RelayConfig {
            ttl: chrono::TimeDelta::minutes(cfg.file_ttl_minutes),
            max_bytes: cfg.max_file_size_bytes(),
            default_limit: cfg.default_download_limit,
            grace: EXHAUSTED_DELETE_GRACE,
        },
    );

    // --- Start background sweep ---
    let _reaper = relay.spawn_reaper(Duration::from_secs(cfg.sweep_interval_secs));

    // --- Build router ---
    let app_state = state::AppState {
        relay,
        base_url: cfg.base_url.clone(),
    };
    let mut app = routes::routes::routes().with_state(app_state);

    // --- Static asset serving (SPA with index.html fallback) ---
    if let Some(static_dir) = &cfg.static_dir {
        let dir = Path::new(static_dir);
        if dir.exists() {
            tracing::info!("Serving static files from {}", static_dir);
            let index = dir.join("index.html");
            app = app.fallback_service(ServeDir::new(dir).not_found_service(ServeFile::new(index)));
        } else {
            tracing::warn!(
                "Static directory {} not found, skipping static file serving",
                static_dir
            );
        }
    }

    // The admission path reports oversize itself; the body limit only has to
    // sit above the configured cap plus multipart framing.
    let body_limit = (cfg.max_file_size_bytes() as usize).saturating_add(1024 * 1024);
    let app = app
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
