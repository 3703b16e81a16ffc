// src/token.rs
//! Serve tokens: `<exp_b64>.<url_b64>.<sig_b64>`.
//!
//! A token says "this URL may be fetched through us until `exp`". It is minted when
//! a photo is handed to TikTok and redeemed by the serve endpoint. Nothing is stored
//! server-side; the HMAC is the only proof.
use std::{fmt, sync::Arc};

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Checked in order, first non-empty value wins.
pub const SECRET_SOURCES: [&str; 2] = ["TIKTOK_SERVE_SECRET", "BLOB_READ_WRITE_TOKEN"];

pub const DEFAULT_TTL_MS: i64 = 60 * 60 * 1000;

fn b64(s: &str) -> String {
    Base64UrlUnpadded::encode_string(s.as_bytes())
}
fn b64_bytes(bytes: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(bytes)
}
fn b64_decode_to_string(s: &str) -> Option<String> {
    let bytes = Base64UrlUnpadded::decode_vec(s).ok()?;
    String::from_utf8(bytes).ok()
}

/// Wall clock in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A secret plus the name of the variable it came from (for logs).
#[derive(Clone, Debug)]
pub struct ResolvedSecret {
    pub source: &'static str,
    pub secret: SecretString,
}

/// Walk `sources` in order and take the first one `lookup` knows about.
/// Unset and blank values are skipped.
pub fn resolve_secret<F>(sources: &[&'static str], lookup: F) -> Result<ResolvedSecret, TokenError>
where
    F: Fn(&str) -> Option<String>,
{
    for &name in sources {
        if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
            return Ok(ResolvedSecret {
                source: name,
                secret: SecretString::new(value),
            });
        }
    }
    Err(TokenError::Config(format!(
        "none of [{}] is set",
        sources.join(", ")
    )))
}

fn keyed_mac(secret: &[u8]) -> Result<HmacSha256, TokenError> {
    HmacSha256::new_from_slice(secret)
        .map_err(|e| TokenError::Config(format!("HMAC key rejected: {e}")))
}

/// Build token: "<exp_b64>.<url_b64>.<sig_b64>"
pub fn sign_token(secret: &[u8], resource_url: &str, exp_ms: i64) -> Result<String, TokenError> {
    let payload = format!("{}.{}", b64(&exp_ms.to_string()), b64(resource_url));
    let mut mac = keyed_mac(secret)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!("{}.{}", payload, b64_bytes(&sig)))
}

/// Mints and verifies serve tokens with one secret and one clock.
pub struct ServeSigner {
    secret: SecretString,
    ttl: ChronoDuration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ServeSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServeSigner")
            .field("ttl_ms", &self.ttl.num_milliseconds())
            .finish_non_exhaustive()
    }
}

impl ServeSigner {
    pub fn new(secret: SecretString, ttl: ChronoDuration, clock: Arc<dyn Clock>) -> Self {
        Self { secret, ttl, clock }
    }

    pub fn ttl(&self) -> ChronoDuration {
        self.ttl
    }

    pub fn create(&self, resource_url: &str) -> Result<String, TokenError> {
        self.create_with_ttl(resource_url, self.ttl)
    }

    /// `ttl` may be zero or negative, which yields an already-expired token.
    pub fn create_with_ttl(
        &self,
        resource_url: &str,
        ttl: ChronoDuration,
    ) -> Result<String, TokenError> {
        let exp = self.clock.now_ms().saturating_add(ttl.num_milliseconds());
        sign_token(self.secret.expose_secret().as_bytes(), resource_url, exp)
    }

    /// Returns the resource URL if the token is authentic, well-formed and unexpired.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        // 1) Shape: exactly three non-empty parts
        let mut parts = token.split('.');
        let (Some(exp_b64), Some(url_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };
        if exp_b64.is_empty() || url_b64.is_empty() || sig_b64.is_empty() {
            return Err(TokenError::Malformed);
        }

        // 2) Signature, before anything in the payload is trusted
        let provided =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::BadSignature)?;
        let mut mac = keyed_mac(self.secret.expose_secret().as_bytes())?;
        mac.update(exp_b64.as_bytes());
        mac.update(b".");
        mac.update(url_b64.as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| TokenError::BadSignature)?;

        // 3) Expiry
        let exp: i64 = b64_decode_to_string(exp_b64)
            .and_then(|s| s.parse().ok())
            .ok_or(TokenError::Malformed)?;

        // 4) URL
        let resource_url = b64_decode_to_string(url_b64).ok_or(TokenError::Malformed)?;
        if !resource_url.starts_with("http") {
            return Err(TokenError::InvalidScheme);
        }

        if self.clock.now_ms() > exp {
            return Err(TokenError::Expired);
        }
        Ok(resource_url)
    }
}

/// Shared handle used by the HTTP layer.
///
/// Holds either a ready signer or the configuration error that kept one from being
/// built, so a missing secret surfaces on every call instead of at boot only.
#[derive(Clone, Debug)]
pub struct ServeTokens {
    inner: Result<Arc<ServeSigner>, TokenError>,
}

impl ServeTokens {
    pub fn new(
        secret: Result<ResolvedSecret, TokenError>,
        ttl: ChronoDuration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = secret.map(|s| Arc::new(ServeSigner::new(s.secret, ttl, clock)));
        Self { inner }
    }

    pub fn signer(&self) -> Result<&ServeSigner, TokenError> {
        self.inner.as_deref().map_err(Clone::clone)
    }

    pub fn create(&self, resource_url: &str) -> Result<String, TokenError> {
        self.signer()?.create(resource_url)
    }

    pub fn create_with_ttl(
        &self,
        resource_url: &str,
        ttl: ChronoDuration,
    ) -> Result<String, TokenError> {
        self.signer()?.create_with_ttl(resource_url, ttl)
    }

    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        self.signer()?.verify(token)
    }
}
