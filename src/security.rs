use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, HeaderMap, HeaderName, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const KEY_HEADER: &str = "X-Bot-Key";

/// API-key authentication plus a per-client token bucket for the relay
/// endpoints. Keys come from `BOT_API_KEYS` as `client:key` pairs.
#[derive(Clone)]
pub struct AuthState {
    clients: Arc<HashMap<String, ClientRecord>>,
    limiter: Arc<TokenBuckets>,
}

/// Who is calling; inserted into request extensions for handlers.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub client_id: String,
    pub api_key_id: String,
}

#[derive(Clone, Debug)]
struct ClientRecord {
    client_id: String,
    api_key_id: String,
}

impl AuthState {
    /// Refuses to start without at least one well-formed key.
    pub fn from_env() -> eyre::Result<Self> {
        let raw = env::var("BOT_API_KEYS").unwrap_or_default();
        Self::from_keys(&raw, TokenBuckets::from_env())
    }

    fn from_keys(raw: &str, limiter: TokenBuckets) -> eyre::Result<Self> {
        let clients = parse_api_keys(raw);
        if clients.is_empty() {
            eyre::bail!("BOT_API_KEYS is unset or has no valid client:key entries");
        }
        info!(
            target = "marketbot.api",
            key_count = clients.len(),
            "loaded API keys from env"
        );
        Ok(Self {
            clients: Arc::new(clients),
            limiter: Arc::new(limiter),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(raw_keys: &str, rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            clients: Arc::new(parse_api_keys(raw_keys)),
            limiter: Arc::new(TokenBuckets::new(rate_per_sec, capacity)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.clients.get(presented).map(|record| AuthContext {
            client_id: record.client_id.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Bot-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        warn!(target = "marketbot.api", "rejected unknown api key");
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&context.client_id).await {
        Ok(permit) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            let mut response =
                error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Too many requests");
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string()).filter(|key| !key.is_empty());
    }
    headers
        .get(KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

/// Parses `client:key,client:key`. Malformed entries are skipped.
fn parse_api_keys(raw: &str) -> HashMap<String, ClientRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (client, key) = match trimmed.split_once(':') {
            Some((client, key)) => (client.trim(), key.trim()),
            None => ("", ""),
        };
        if client.is_empty() || key.is_empty() {
            warn!(
                target = "marketbot.api",
                "ignored malformed BOT_API_KEYS entry at position {}",
                idx + 1
            );
            continue;
        }
        entries.insert(
            key.to_string(),
            ClientRecord {
                client_id: client.to_string(),
                api_key_id: format!("key-{:02}", idx + 1),
            },
        );
    }
    entries
}

struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBuckets {
    fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

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

    async fn consume(&self, client_id: &str) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let bucket = guard.entry(client_id.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }

        let snapshot = RateSnapshot {
            capacity: self.capacity,
            tokens: bucket.tokens,
            rate: self.rate_per_sec,
        };
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(RatePermit(RateSnapshot {
                tokens: bucket.tokens,
                ..snapshot
            }))
        } else {
            let retry_after = ((1.0 - bucket.tokens) / self.rate_per_sec).max(0.0);
            Err(RateExceeded {
                retry_after,
                snapshot,
            })
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateSnapshot {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RateSnapshot {
    fn reset_secs(&self) -> u64 {
        ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64
    }

    fn apply_headers(&self, headers: &mut HeaderMap, remaining: u64) {
        set_number(headers, "x-ratelimit-limit", self.capacity as u64);
        set_number(headers, "x-ratelimit-remaining", remaining);
        set_number(headers, "x-ratelimit-reset", self.reset_secs());
    }
}

#[derive(Debug, Clone)]
pub struct RatePermit(RateSnapshot);

impl RatePermit {
    fn apply_headers(&self, headers: &mut HeaderMap) {
        let remaining = self.0.tokens.max(0.0).floor() as u64;
        self.0.apply_headers(headers, remaining);
    }
}

#[derive(Debug, Clone)]
pub struct RateExceeded {
    retry_after: f64,
    snapshot: RateSnapshot,
}

impl RateExceeded {
    fn apply_headers(&self, headers: &mut HeaderMap) {
        let retry = (self.retry_after.ceil() as u64).max(1);
        headers.insert(http::header::RETRY_AFTER, HeaderValue::from(retry));
        self.snapshot.apply_headers(headers, 0);
    }
}

fn set_number(headers: &mut HeaderMap, name: &'static str, value: u64) {
    headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
}
