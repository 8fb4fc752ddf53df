use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use ring::hmac;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "X-Salon-Key";
/// Signed OAuth state older than this is rejected.
pub const STATE_MAX_AGE_SECS: i64 = 600;

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, TenantKey>>,
    limiter: Arc<TokenBuckets>,
}

/// Identity attached to every authenticated request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthContext {
    pub tenant_id: Uuid,
    pub api_key_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct TenantKey {
    tenant_id: Uuid,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("SALON_API_KEYS").unwrap_or_default();
        Self::with_keys(&raw, TokenBuckets::from_env())
    }

    /// `raw` uses the `tenant_uuid:key,...` format of `SALON_API_KEYS`.
    pub fn with_keys(raw: &str, limiter: TokenBuckets) -> Self {
        Self::new(parse_keys(raw), limiter)
    }

    fn new(records: HashMap<String, TenantKey>, limiter: TokenBuckets) -> Self {
        if records.is_empty() {
            warn!(
                target = "salon_gbp.api",
                "SALON_API_KEYS produced no keys; protected routes will reject every request"
            );
        } else {
            info!(
                target = "salon_gbp.api",
                key_count = records.len(),
                "api_keys_loaded"
            );
        }
        Self {
            records: Arc::new(records),
            limiter: Arc::new(limiter),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            tenant_id: record.tenant_id,
            api_key_id: record.api_key_id.clone(),
        })
    }

    async fn consume(&self, tenant_id: Uuid) -> Result<RatePermit, RateExceeded> {
        self.limiter.consume(&tenant_id.to_string()).await
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        let response =
            unauthorized_response("missing_api_key", "Provide X-Salon-Key or Bearer token");
        return Ok(response);
    };

    let Some(context) = state.authenticate(&presented) else {
        let response = unauthorized_response("invalid_api_key", "Key not recognized");
        return Ok(response);
    };

    match state.consume(context.tenant_id).await {
        Ok(permit) => {
            request.extensions_mut().insert(context.clone());
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            warn!(
                target = "salon_gbp.api",
                tenant_id = %context.tenant_id,
                "rate_limited"
            );
            let mut response = too_many_requests("rate_limited", "Too many requests");
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn too_many_requests(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(payload)).into_response()
}

/// `tenant_uuid:key` pairs separated by commas. Malformed entries are skipped.
fn parse_keys(raw: &str) -> HashMap<String, TenantKey> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let tenant = parts.next().map(str::trim).and_then(|s| Uuid::parse_str(s).ok());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (tenant, key) {
            (Some(tenant_id), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    TenantKey {
                        tenant_id,
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(
                target = "salon_gbp.api",
                entry = idx + 1,
                "ignored malformed SALON_API_KEYS entry"
            ),
        }
    }
    entries
}

#[derive(Clone)]
pub struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl TokenBuckets {
    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self::new(rate_per_sec, capacity)
    }

    pub fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn consume(&self, key: &str) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(RatePermit {
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        } else {
            let deficit = 1.0 - state.tokens;
            let retry_after = (deficit / self.rate_per_sec).max(0.0);
            Err(RateExceeded {
                retry_after,
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatePermit {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RatePermit {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let remaining = self.tokens.max(0.0).floor() as u64;
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert("X-RateLimit-Limit", header_number(self.capacity as u64));
        headers.insert("X-RateLimit-Remaining", header_number(remaining));
        headers.insert("X-RateLimit-Reset", header_number(reset));
    }
}

#[derive(Debug, Clone)]
pub struct RateExceeded {
    retry_after: f64,
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RateExceeded {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let retry = self.retry_after.ceil().max(1.0) as u64;
        headers.insert(http::header::RETRY_AFTER, header_number(retry));
        headers.insert("X-RateLimit-Limit", header_number(self.capacity as u64));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert("X-RateLimit-Reset", header_number(reset));
    }
}

fn header_number(value: u64) -> HeaderValue {
    HeaderValue::from(value)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("OAUTH_STATE_SECRET is not configured")]
    MissingSecret,
    #[error("invalid OAuth state")]
    Invalid,
    #[error("OAuth state expired")]
    Expired,
}

/// What the OAuth round trip carries back to the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub tenant_id: Uuid,
    pub nonce: String,
    pub issued_at: i64,
}

/// HMAC-SHA256 signed, timestamped OAuth `state` values:
/// `b64url(json) "." b64url(tag)`.
#[derive(Clone)]
pub struct StateSigner {
    key: Option<hmac::Key>,
}

impl StateSigner {
    pub fn from_env() -> Self {
        Self::new(&env::var("OAUTH_STATE_SECRET").unwrap_or_default())
    }

    pub fn new(secret: &str) -> Self {
        let secret = secret.trim();
        Self {
            key: (!secret.is_empty()).then(|| hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes())),
        }
    }

    fn key(&self) -> Result<&hmac::Key, StateError> {
        self.key.as_ref().ok_or(StateError::MissingSecret)
    }

    pub fn sign(&self, tenant_id: Uuid) -> Result<String, StateError> {
        let key = self.key()?;
        let state = OAuthState {
            tenant_id,
            nonce: Uuid::new_v4().simple().to_string(),
            issued_at: Utc::now().timestamp(),
        };
        let payload = serde_json::to_vec(&state).map_err(|_| StateError::Invalid)?;
        let tag = hmac::sign(key, &payload);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag.as_ref())
        ))
    }

    pub fn verify(&self, raw: &str) -> Result<OAuthState, StateError> {
        self.verify_at(raw, Utc::now().timestamp())
    }

    fn verify_at(&self, raw: &str, now: i64) -> Result<OAuthState, StateError> {
        let key = self.key()?;
        let (payload, tag) = raw.split_once('.').ok_or(StateError::Invalid)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| StateError::Invalid)?;
        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| StateError::Invalid)?;
        hmac::verify(key, &payload, &tag).map_err(|_| StateError::Invalid)?;
        let state: OAuthState =
            serde_json::from_slice(&payload).map_err(|_| StateError::Invalid)?;
        if now - state.issued_at > STATE_MAX_AGE_SECS {
            return Err(StateError::Expired);
        }
        Ok(state)
    }
}
