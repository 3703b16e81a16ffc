// src/lib.rs
//! Relay between the Bleamies image generator and TikTok.
//!
//! TikTok only pulls photos from verified domains, while generated images live in
//! blob storage. Instead of exposing blob URLs, [`token`] signs an expiring
//! reference to the blob and `GET /api/tiktok/serve?token=...` proxies it from our
//! own origin.
//!
//! # Routes
//! - `GET  /health`
//! - `GET  /api/tiktok/serve?token=<token>`: verify and stream the image
//! - `POST /api/tiktok/post-photo`: hand a photo to TikTok as a draft
//!
//! # Environment
//! `TIKTOK_SERVE_SECRET` (or `BLOB_READ_WRITE_TOKEN` as fallback) signs tokens.
//! See [`config::Config`] for the rest.
use std::{sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tokio::{net::TcpListener, signal};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod error;
pub mod handlers;
pub mod publish;
pub mod token;

use config::Config;
use handlers::{
    photo::{post_photo, PhotoState},
    serve::{serve_image, ServeState, SERVE_PATH},
};
use publish::{Publisher, TikTokPublisher};
use token::{ServeTokens, SystemClock};

pub fn app(cfg: &Config, tokens: ServeTokens, http: Client, publisher: Arc<dyn Publisher>) -> Router {
    // ===== Serve (TikTok pulls images here) =====
    let serve_router = Router::new()
        .route(SERVE_PATH, get(serve_image))
        .with_state(ServeState {
            tokens: tokens.clone(),
            http,
            cache_max_age: cfg.serve_cache_max_age,
        });

    // ===== Photo post =====
    let photo_router = Router::new()
        .route("/api/tiktok/post-photo", post(post_photo))
        .with_state(PhotoState {
            tokens,
            app_url: cfg.app_url.clone(),
            publisher,
        });

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(serve_router)
        .merge(photo_router)
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Shared client. The timeout bounds connecting and each read, not the whole body,
/// so a large image streamed to a slow reader is not cut off midway.
pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
}

pub async fn start_server() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ==== Config ====
    let cfg = Config::from_env();
    let tokens = ServeTokens::new(
        cfg.serve_secret.clone(),
        cfg.serve_token_ttl(),
        Arc::new(SystemClock),
    );

    // ==== Shared HTTP client (upstream fetch + TikTok API) ====
    let timeout = Duration::from_secs(cfg.serve_fetch_timeout_secs);
    let http = http_client(timeout)?;
    let publisher: Arc<dyn Publisher> = Arc::new(TikTokPublisher::new(
        http.clone(),
        cfg.tiktok_api_base.clone(),
        timeout,
    ));

    let router = app(&cfg, tokens, http, publisher);

    // ==== Start server ====
    let listener = TcpListener::bind(&cfg.bind).await?;
    info!("listening on http://{}", cfg.bind);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl+C");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
