use redis::AsyncCommands;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::debug;

const KEY_PREFIX: &str = "marketbot:idem:";

/// Replay cache for `Idempotency-Key`: a chat front-end that re-delivers an
/// update gets the stored reply instead of advancing the wizard twice.
///
/// Redis is used when configured; otherwise entries live in process memory
/// with the same TTL.
#[derive(Clone)]
pub struct IdempotencyCache {
    redis: Option<redis::Client>,
    local: Arc<Mutex<HashMap<String, (Instant, Value)>>>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(redis: Option<redis::Client>, ttl: Duration) -> Self {
        Self {
            redis,
            local: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn from_env() -> Self {
        let redis = std::env::var("REDIS_URL")
            .ok()
            .and_then(|url| redis::Client::open(url).ok());
        let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);
        Self::new(redis, Duration::from_secs(ttl))
    }

    pub async fn get(&self, scope: &str, key: &str) -> Option<Value> {
        let key = cache_key(scope, key);
        if let Some(client) = &self.redis {
            return redis_get(client, &key).await;
        }
        let mut guard = self.local.lock().await;
        match guard.get(&key) {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                guard.remove(&key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, scope: &str, key: &str, value: &Value) {
        let key = cache_key(scope, key);
        if let Some(client) = &self.redis {
            redis_set(client, &key, value, self.ttl.as_secs()).await;
            return;
        }
        let mut guard = self.local.lock().await;
        guard.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
        guard.insert(key, (Instant::now(), value.clone()));
    }
}

/// Keys are scoped per API client so two relays cannot collide.
fn cache_key(scope: &str, key: &str) -> String {
    format!("{KEY_PREFIX}{scope}:{key}")
}

pub async fn redis_get(client: &redis::Client, key: &str) -> Option<Value> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(err) => {
            debug!(target = "marketbot.api", error = %err, "idempotency_redis_unavailable");
            return None;
        }
    };
    let s: Option<String> = conn.get(key).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

pub async fn redis_set(client: &redis::Client, key: &str, value: &Value, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replays_within_scope() {
        let cache = IdempotencyCache::new(None, Duration::from_secs(60));
        cache.put("relay", "upd-1", &json!({"state": "idle"})).await;
        assert_eq!(
            cache.get("relay", "upd-1").await,
            Some(json!({"state": "idle"}))
        );
        assert!(cache.get("admin", "upd-1").await.is_none());
        assert!(cache.get("relay", "upd-2").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let cache = IdempotencyCache::new(None, Duration::ZERO);
        cache.put("relay", "upd-1", &json!(1)).await;
        assert!(cache.get("relay", "upd-1").await.is_none());
    }
}
