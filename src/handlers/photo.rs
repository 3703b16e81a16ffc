// src/handlers/photo.rs
use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tower_cookies::{Cookie, Cookies};
use tracing::{info, warn};

use crate::handlers::serve::serve_url;
use crate::publish::{PhotoPost, PublishError, Publisher};
use crate::token::ServeTokens;

pub const ACCESS_COOKIE: &str = "tiktok_access_token";
pub const REFRESH_COOKIE: &str = "tiktok_refresh_token";

const MAX_TITLE_CHARS: usize = 90;
const DEFAULT_TITLE: &str = "Bleamies";
const DEFAULT_PRIVACY: &str = "SELF_ONLY";

static SCOPE_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)scope|permission|authorize|access denied").expect("scope regex")
});

#[derive(Clone)]
pub struct PhotoState {
    pub tokens: ServeTokens,
    /// When set, TikTok is given a serve URL on this origin instead of the raw blob URL.
    pub app_url: Option<String>,
    pub publisher: Arc<dyn Publisher>,
}

fn title_from(caption: &str) -> String {
    let title: String = caption.chars().take(MAX_TITLE_CHARS).collect();
    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title
    }
}

/// The TikTok cookies are set on `/`; a removal without that path would miss them.
fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

/// POST /api/tiktok/post-photo (multipart: photo_url, caption, privacy_level)
pub async fn post_photo(
    State(st): State<PhotoState>,
    cookies: Cookies,
    mut mp: Multipart,
) -> impl IntoResponse {
    // 1) Auth
    let Some(access_token) = cookies
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
    else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "ok": false,
                "error": "Not authenticated. Please connect your TikTok account first."
            })),
        )
            .into_response();
    };

    // 2) Fields
    let mut photo_url: Option<String> = None;
    let mut caption = String::new();
    let mut privacy_level = DEFAULT_PRIVACY.to_string();

    while let Some(field) = match mp.next_field().await {
        Ok(f) => f,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"ok": false, "where": "multipart", "error": e.to_string()})),
            )
                .into_response()
        }
    } {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "photo_url" => {
                photo_url = field.text().await.ok().map(|s| s.trim().to_string());
            }
            "caption" => {
                caption = field.text().await.unwrap_or_default();
            }
            "privacy_level" => {
                if let Some(p) = field.text().await.ok().filter(|p| !p.trim().is_empty()) {
                    privacy_level = p.trim().to_string();
                }
            }
            _ => {}
        }
    }

    let Some(photo_url) = photo_url.filter(|u| u.starts_with("http")) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": "Provide a \"photo_url\" (public http(s) URL)."})),
        )
            .into_response();
    };

    // 3) Route TikTok through our own domain when we have one
    let pull_url = match &st.app_url {
        Some(app_url) => match st.tokens.create(&photo_url) {
            Ok(token) => serve_url(app_url, &token),
            Err(e) => {
                warn!(kind = e.kind(), "cannot mint serve token");
                return e.into_response();
            }
        },
        None => photo_url,
    };

    // 4) Publish
    let post = PhotoPost {
        photo_url: pull_url,
        title: title_from(&caption),
        privacy_level,
    };
    match st.publisher.publish_photo(&access_token, &post).await {
        Ok(data) => {
            info!(privacy = %post.privacy_level, "photo handed to tiktok");
            (
                StatusCode::OK,
                Json(json!({
                    "ok": true,
                    "success": true,
                    "message": "Uploaded to TikTok as draft. Check your app to edit and post.",
                    "data": data
                })),
            )
                .into_response()
        }
        Err(PublishError::Rejected { status, message })
            if status == StatusCode::FORBIDDEN.as_u16() && SCOPE_ERROR.is_match(&message) =>
        {
            cookies.remove(removal_cookie(ACCESS_COOKIE));
            cookies.remove(removal_cookie(REFRESH_COOKIE));
            (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "ok": false,
                    "error": "Missing photo post permission. Reconnect your TikTok account and accept all requested permissions.",
                    "requiresReauth": true
                })),
            )
                .into_response()
        }
        Err(PublishError::Rejected { status, message }) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            Json(json!({"ok": false, "error": message})),
        )
            .into_response(),
        Err(PublishError::Transport(e)) => {
            warn!(error = %e, "tiktok publish transport error");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"ok": false, "error": "Failed to reach TikTok"})),
            )
                .into_response()
        }
    }
}
