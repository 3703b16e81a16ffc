// src/publish.rs
//! Handing a photo over to TikTok's Content Posting API.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

const CONTENT_INIT_PATH: &str = "/v2/post/publish/content/init/";

#[derive(Error, Debug)]
pub enum PublishError {
    /// The API answered with a non-2xx status.
    #[error("publish rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("publish request failed: {0}")]
    Transport(String),
}

/// One photo post, already pointing at a URL TikTok is allowed to pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoPost {
    pub photo_url: String,
    pub title: String,
    pub privacy_level: String,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns the API's `data` object (holds `publish_id`) on success.
    async fn publish_photo(&self, access_token: &str, post: &PhotoPost)
        -> Result<Value, PublishError>;
}

#[derive(Debug, Clone)]
pub struct TikTokPublisher {
    client: Client,
    api_base: String,
    timeout: Duration,
}

impl TikTokPublisher {
    pub fn new(client: Client, api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            timeout,
        }
    }

    fn init_body(post: &PhotoPost) -> Value {
        json!({
            "media_type": "PHOTO",
            // lands as a draft; the user finishes the post in the app
            "post_mode": "MEDIA_UPLOAD",
            "post_info": {
                "title": post.title,
                "privacy_level": post.privacy_level,
                "disable_comment": false,
            },
            "source_info": {
                "source": "PULL_FROM_URL",
                "photo_images": [post.photo_url],
                "photo_cover_index": 0,
            },
        })
    }
}

#[async_trait]
impl Publisher for TikTokPublisher {
    async fn publish_photo(
        &self,
        access_token: &str,
        post: &PhotoPost,
    ) -> Result<Value, PublishError> {
        let url = format!("{}{}", self.api_base, CONTENT_INIT_PATH);
        let res = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(access_token)
            .header("Content-Type", "application/json; charset=UTF-8")
            .json(&Self::init_body(post))
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = res.status();
        // body may be empty or non-JSON on gateway errors
        let body: Value = res.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let message = rejection_message(&body);
            warn!(status = status.as_u16(), %message, "tiktok content init rejected");
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let publish_id = data
            .get("publish_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("-");
        info!(publish_id, "tiktok photo draft created");
        Ok(data)
    }
}

fn rejection_message(body: &Value) -> String {
    let err = body.get("error");
    err.and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| err.and_then(|e| e.get("code")).and_then(Value::as_str))
        .unwrap_or("Unknown error")
        .to_string()
}
