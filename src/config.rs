// src/config.rs
use std::env;

use chrono::Duration as ChronoDuration;
use tracing::{info, warn};

use crate::error::TokenError;
use crate::token::{resolve_secret, ResolvedSecret, DEFAULT_TTL_MS, SECRET_SOURCES};

pub const DEFAULT_TIKTOK_API_BASE: &str = "https://open.tiktokapis.com";

#[derive(Clone, Debug)]
pub struct Config {
    // ===== Server =====
    pub bind: String,
    /// Public origin serve URLs are built on, e.g. `https://www.bleamies.com`.
    pub app_url: Option<String>,

    // ===== Serve tokens =====
    pub serve_secret: Result<ResolvedSecret, TokenError>,
    pub serve_token_ttl_ms: i64,
    pub serve_cache_max_age: u32,
    pub serve_fetch_timeout_secs: u64,

    // ===== TikTok =====
    pub tiktok_api_base: String,
}

impl Config {
    pub fn from_env() -> Self {
        let cfg = Self::from_lookup(|key| env::var(key).ok());
        cfg.log_summary();
        cfg
    }

    /// Same as [`Config::from_env`] but reads through `lookup`, so tests never touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind = lookup("BIND").unwrap_or_else(|| "0.0.0.0:8080".into());
        let app_url = lookup("APP_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let serve_secret = resolve_secret(&SECRET_SOURCES, &lookup);
        let serve_token_ttl_ms = lookup("SERVE_TOKEN_TTL_MS")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_TTL_MS);
        let serve_cache_max_age = lookup("SERVE_CACHE_MAX_AGE")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(3600);
        let serve_fetch_timeout_secs = lookup("SERVE_FETCH_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(20);

        let tiktok_api_base = lookup("TIKTOK_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TIKTOK_API_BASE.into());

        Self {
            bind,
            app_url,
            serve_secret,
            serve_token_ttl_ms,
            serve_cache_max_age,
            serve_fetch_timeout_secs,
            tiktok_api_base,
        }
    }

    pub fn serve_token_ttl(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.serve_token_ttl_ms)
    }

    fn log_summary(&self) {
        info!(
            bind = %self.bind,
            app_url = self.app_url.as_deref().unwrap_or("-"),
            serve_secret = secret_source(&self.serve_secret),
            serve_token_ttl_ms = self.serve_token_ttl_ms,
            serve_cache_max_age = self.serve_cache_max_age,
            serve_fetch_timeout_secs = self.serve_fetch_timeout_secs,
            tiktok_api_base = %self.tiktok_api_base,
            "[config] loaded"
        );
        if let Err(e) = &self.serve_secret {
            warn!("[config] {e}; serve tokens will fail until a secret is set");
        }
    }
}

/// Which variable supplied the secret, never the secret itself.
fn secret_source(secret: &Result<ResolvedSecret, TokenError>) -> &'static str {
    match secret {
        Ok(s) => s.source,
        Err(_) => "-",
    }
}
