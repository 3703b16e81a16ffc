// src/handlers/serve.rs
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::token::ServeTokens;

pub const SERVE_PATH: &str = "/api/tiktok/serve";

#[derive(Clone)]
pub struct ServeState {
    pub tokens: ServeTokens,
    pub http: Client,
    pub cache_max_age: u32,
}

#[derive(Deserialize)]
pub struct ServeQuery {
    pub token: Option<String>,
}

/// Same-origin URL for a token: "<app_url>/api/tiktok/serve?token=<token>".
/// Tokens are base64url plus dots, so no escaping is needed.
pub fn serve_url(app_url: &str, token: &str) -> String {
    format!("{}{}?token={}", app_url.trim_end_matches('/'), SERVE_PATH, token)
}

/// GET /api/tiktok/serve?token=...
/// Lets TikTok pull the image from our verified domain instead of blob storage.
pub async fn serve_image(
    State(st): State<ServeState>,
    Query(q): Query<ServeQuery>,
) -> impl IntoResponse {
    // 1) Token present?
    let Some(token) = q.token.filter(|t| !t.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": "Missing token"})),
        )
            .into_response();
    };

    // 2) Verify
    let blob_url = match st.tokens.verify(&token) {
        Ok(u) => u,
        Err(e) => {
            warn!(kind = e.kind(), "serve token rejected");
            return e.into_response();
        }
    };

    // 3) Fetch upstream
    let upstream = match st.http.get(&blob_url).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            warn!(status = r.status().as_u16(), "serve upstream returned error status");
            return bad_gateway();
        }
        Err(e) => {
            warn!(error = %e, "serve upstream fetch failed");
            return bad_gateway();
        }
    };

    // 4) Stream back with the upstream content type
    let ctype = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("image/png"));
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, ctype);
    if let Ok(cc) = HeaderValue::from_str(&format!("public, max-age={}", st.cache_max_age)) {
        headers.insert(header::CACHE_CONTROL, cc);
    }
    debug!("serving image via token");

    let stream = upstream.bytes_stream();
    (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
}

fn bad_gateway() -> axum::response::Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({"ok": false, "error": "Failed to fetch image"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    use axum::{body::to_bytes, http::Request, routing::get, Router};
    use chrono::Duration as ChronoDuration;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    use crate::error::TokenError;
    use crate::http_client;
    use crate::token::{resolve_secret, SystemClock, SECRET_SOURCES};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot-really-a-png";

    fn tokens(secret: Option<&str>) -> ServeTokens {
        let secret = secret.map(str::to_string);
        ServeTokens::new(
            resolve_secret(&SECRET_SOURCES, |_| secret.clone()),
            ChronoDuration::hours(1),
            Arc::new(SystemClock),
        )
    }

    fn app(tokens: ServeTokens) -> Router {
        app_with_client(tokens, Client::new())
    }

    fn app_with_client(tokens: ServeTokens, http: Client) -> Router {
        Router::new()
            .route(SERVE_PATH, get(serve_image))
            .with_state(ServeState {
                tokens,
                http,
                cache_max_age: 3600,
            })
    }

    async fn upstream() -> String {
        let app = Router::new()
            .route(
                "/img.jpg",
                get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], PNG) }),
            )
            .route("/missing.png", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/slow.png",
                get(|| async {
                    // three chunks, 600ms apart
                    let chunks = futures::stream::unfold(0u8, |i| async move {
                        if i == 3 {
                            return None;
                        }
                        tokio::time::sleep(Duration::from_millis(600)).await;
                        Some((Ok::<_, std::io::Error>(vec![b'x'; 4]), i + 1))
                    });
                    ([(header::CONTENT_TYPE, "image/png")], Body::from_stream(chunks))
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    async fn call(app: Router, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        let res = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    fn error_of(body: &[u8]) -> String {
        let v: Value = serde_json::from_slice(body).unwrap();
        v["error"].as_str().unwrap_or_default().to_string()
    }

    #[test]
    fn serve_url_joins_origin_and_token() {
        assert_eq!(
            serve_url("https://www.bleamies.com/", "a.b.c"),
            "https://www.bleamies.com/api/tiktok/serve?token=a.b.c"
        );
    }

    #[tokio::test]
    async fn missing_token_is_bad_request() {
        let (status, _, body) = call(app(tokens(Some("k"))), SERVE_PATH).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_of(&body), "Missing token");

        let (status, _, _) = call(app(tokens(Some("k"))), &format!("{SERVE_PATH}?token=")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forged_and_malformed_tokens_look_the_same() {
        let t = tokens(Some("k"));
        let good = t.create("https://blob.example.com/img.png").unwrap();
        let swap = if good.ends_with('A') { 'E' } else { 'A' };
        let forged = format!("{}{}", &good[..good.len() - 1], swap);

        let (s1, _, b1) = call(app(t.clone()), &format!("{SERVE_PATH}?token=onlyonepart")).await;
        let (s2, _, b2) = call(app(t), &format!("{SERVE_PATH}?token={forged}")).await;
        assert_eq!(s1, StatusCode::BAD_REQUEST);
        assert_eq!(s2, StatusCode::BAD_REQUEST);
        assert_eq!(error_of(&b1), "Invalid token");
        assert_eq!(error_of(&b2), "Invalid token");
    }

    #[tokio::test]
    async fn expired_token_is_rejected_without_fetch() {
        let t = tokens(Some("k"));
        let token = t
            .create_with_ttl("http://127.0.0.1:9/never-fetched.png", ChronoDuration::milliseconds(-1))
            .unwrap();
        let (status, _, body) = call(app(t), &format!("{SERVE_PATH}?token={token}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_of(&body), "Token expired");
    }

    #[tokio::test]
    async fn missing_secret_is_server_error() {
        let (status, _, body) = call(app(tokens(None)), &format!("{SERVE_PATH}?token=a.b.c")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_of(&body), TokenError::Config(String::new()).public_message());
        assert!(!String::from_utf8_lossy(&body).contains("TIKTOK_SERVE_SECRET"));
    }

    #[tokio::test]
    async fn valid_token_streams_upstream_image() {
        let base = upstream().await;
        let t = tokens(Some("k"));
        let token = t.create(&format!("{base}/img.jpg")).unwrap();

        let (status, headers, body) = call(app(t), &format!("{SERVE_PATH}?token={token}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=3600");
        assert_eq!(body, PNG);
    }

    #[tokio::test]
    async fn upstream_error_is_bad_gateway() {
        let base = upstream().await;
        let t = tokens(Some("k"));
        let token = t.create(&format!("{base}/missing.png")).unwrap();

        let (status, _, body) = call(app(t), &format!("{SERVE_PATH}?token={token}")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(error_of(&body), "Failed to fetch image");
    }

    #[tokio::test]
    async fn slow_body_longer_than_timeout_still_streams() {
        let base = upstream().await;
        let t = tokens(Some("k"));
        let token = t.create(&format!("{base}/slow.png")).unwrap();

        // whole body takes ~1.8s, each read well under 1s
        let client = http_client(Duration::from_secs(1)).unwrap();
        let (status, _, body) =
            call(app_with_client(t, client), &format!("{SERVE_PATH}?token={token}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, vec![b'x'; 12]);
    }
}
