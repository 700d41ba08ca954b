// ============================================
// User Context Fetcher
// ============================================
// One bounded MGET per request for the user's counter and profile blobs.
// Any failure degrades to an empty context; ranking continues.

use async_trait::async_trait;
use prost::Message;
use redis::aio::ConnectionManager;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

#[cfg(test)]
use mockall::automock;

use crate::metrics::{self, ErrorSite, StageTimer};
use crate::models::{UserCounterBlob, UserProfileBlob};

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Key-value store error: {0}")]
    Store(String),
}

/// Batched key-value read. Returns one entry per key, in key order.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, KvError>;
}

/// Redis-backed store using a shared multiplexed connection
#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn: ConnectionManager,
}

impl RedisKeyValueStore {
    pub async fn connect(client: redis::Client) -> Result<Self, KvError> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, KvError> {
        let mut conn = self.conn.clone();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }
}

/// Per-request user data. Empty when the store had nothing or failed.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub counters: UserCounterBlob,
    pub profile: UserProfileBlob,
}

pub fn user_counter_key(user_id: &str) -> String {
    format!("user-counter:{}", user_id)
}

pub fn user_profile_key(user_id: &str) -> String {
    format!("user-profile:{}", user_id)
}

pub struct UserContextFetcher {
    store: Box<dyn KeyValueStore>,
    timeout: Duration,
}

impl UserContextFetcher {
    pub fn new(store: Box<dyn KeyValueStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Fetch and decode the user's blobs. Never fails the request.
    pub async fn fetch(&self, user_id: &str) -> UserContext {
        let mut context = UserContext::default();
        let keys = vec![user_counter_key(user_id), user_profile_key(user_id)];

        let results = {
            let _timer = StageTimer::start("kv_mget");
            match tokio::time::timeout(self.timeout, self.store.multi_get(&keys)).await {
                Ok(Ok(results)) if results.len() >= keys.len() => results,
                Ok(Ok(results)) => {
                    metrics::record_error(ErrorSite::KvMget);
                    error!(user_id, size = results.len(), "KV mget returned short result");
                    return context;
                }
                Ok(Err(e)) => {
                    metrics::record_error(ErrorSite::KvMget);
                    error!(user_id, error = %e, "KV mget failed");
                    return context;
                }
                Err(_) => {
                    metrics::record_error(ErrorSite::KvTimeout);
                    warn!(
                        user_id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "KV mget timed out"
                    );
                    return context;
                }
            }
        };

        let mut results = results.into_iter();
        let counter_blob = results.next().flatten().unwrap_or_default();
        let profile_blob = results.next().flatten().unwrap_or_default();

        if !counter_blob.is_empty() {
            match UserCounterBlob::decode(counter_blob.as_slice()) {
                Ok(counters) => context.counters = counters,
                Err(e) => {
                    metrics::record_error(ErrorSite::UserCounterParse);
                    error!(user_id, error = %e, "Failed to decode user counter blob");
                }
            }
        }

        if !profile_blob.is_empty() {
            match UserProfileBlob::decode(profile_blob.as_slice()) {
                Ok(profile) => context.profile = profile,
                Err(e) => {
                    metrics::record_error(ErrorSite::UserProfileParse);
                    error!(user_id, error = %e, "Failed to decode user profile blob");
                }
            }
        }

        context
    }
}
