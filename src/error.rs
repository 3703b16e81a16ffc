// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Everything that can go wrong while minting or redeeming a serve token.
///
/// `Malformed`, `BadSignature` and `InvalidScheme` are deliberately rendered the
/// same way to clients; only logs see the difference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("serve token secret not configured: {0}")]
    Config(String),

    #[error("malformed token")]
    Malformed,

    #[error("token signature mismatch")]
    BadSignature,

    #[error("token resource is not an http(s) url")]
    InvalidScheme,

    #[error("token expired")]
    Expired,
}

impl TokenError {
    /// Stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Config(_) => "config",
            TokenError::Malformed => "malformed",
            TokenError::BadSignature => "bad_signature",
            TokenError::InvalidScheme => "invalid_scheme",
            TokenError::Expired => "expired",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TokenError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Text safe to hand to an external caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            TokenError::Config(_) => "server misconfigured",
            TokenError::Malformed | TokenError::BadSignature | TokenError::InvalidScheme => {
                "Invalid token"
            }
            TokenError::Expired => "Token expired",
        }
    }
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({"ok": false, "error": self.public_message()})),
        )
            .into_response()
    }
}
