// ============================================
// Telemetry Emitter
// ============================================
// Two event streams per request:
// - rec_ads: one event per returned candidate, with its feature snapshot
// - req_ads: one event per scored candidate, before truncation
// Publishing is fire-and-forget on a detached task. Each batch publishes
// its events concurrently; batches past the in-flight limit are dropped.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::streams::StreamMaxlen;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::{self, ErrorSite};
use crate::models::{AdLogRecord, RecAdRecord, RequestTelemetry, ScoredCandidate};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("publish timed out after {0}ms")]
    Timeout(u64),
}

/// Append one keyed JSON payload to a named stream.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, stream: &str, key: &str, payload: &str) -> Result<(), PublishError>;
}

/// `XADD <stream> MAXLEN ~ N * key <key> payload <json>`
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    maxlen: usize,
}

impl RedisStreamPublisher {
    pub async fn connect(client: redis::Client, maxlen: usize) -> Result<Self, PublishError> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, maxlen })
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, stream: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd_maxlen(
                stream,
                StreamMaxlen::Approx(self.maxlen),
                "*",
                &[("key", key), ("payload", payload)],
            )
            .await?;
        Ok(())
    }
}

#[cfg(feature = "kafka")]
pub use kafka::KafkaPublisher;

#[cfg(feature = "kafka")]
mod kafka {
    use super::{EventPublisher, PublishError};
    use async_trait::async_trait;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::ClientConfig;
    use std::time::Duration;

    /// Stream name is used as the topic.
    pub struct KafkaPublisher {
        producer: FutureProducer,
        queue_timeout: Duration,
    }

    impl KafkaPublisher {
        pub fn new(brokers: &str, queue_timeout: Duration) -> Result<Self, PublishError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("message.timeout.ms", "5000")
                .set("compression.type", "lz4")
                .create()?;
            Ok(Self {
                producer,
                queue_timeout,
            })
        }
    }

    #[async_trait]
    impl EventPublisher for KafkaPublisher {
        async fn publish(
            &self,
            stream: &str,
            key: &str,
            payload: &str,
        ) -> Result<(), PublishError> {
            let record = FutureRecord::to(stream).key(key).payload(payload);
            self.producer
                .send(record, self.queue_timeout)
                .await
                .map_err(|(err, _)| PublishError::Kafka(err))?;
            Ok(())
        }
    }
}

/// Events for one request, ready to publish.
#[derive(Debug, Clone, Default)]
pub struct TelemetryBatch {
    pub request_id: String,
    pub rec_ads: Vec<RecAdRecord>,
    pub req_ads: Vec<AdLogRecord>,
}

impl TelemetryBatch {
    /// Pair each returned candidate with its keyed record; unknown creatives are skipped.
    pub fn build(
        request_id: &str,
        ranked: &[ScoredCandidate],
        mut telemetry: RequestTelemetry,
    ) -> Self {
        let rec_ads = ranked
            .iter()
            .filter_map(|c| telemetry.rec_ads.remove(&c.creative_id))
            .collect();

        Self {
            request_id: request_id.to_string(),
            rec_ads,
            req_ads: telemetry.req_ads,
        }
    }
}

const DEFAULT_MAX_IN_FLIGHT: usize = 256;
const DEFAULT_PUBLISH_CONCURRENCY: usize = 32;

#[derive(Clone)]
pub struct TelemetryEmitter {
    publisher: Arc<dyn EventPublisher>,
    rec_stream: Arc<str>,
    req_stream: Arc<str>,
    timeout: Duration,
    in_flight: Arc<Semaphore>,
    concurrency: usize,
}

impl TelemetryEmitter {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        rec_stream: &str,
        req_stream: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            publisher,
            rec_stream: Arc::from(rec_stream),
            req_stream: Arc::from(req_stream),
            timeout,
            in_flight: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            concurrency: DEFAULT_PUBLISH_CONCURRENCY,
        }
    }

    /// Cap the batches publishing at once and the publishes per batch.
    pub fn with_limits(mut self, max_in_flight_batches: usize, publish_concurrency: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(max_in_flight_batches.max(1)));
        self.concurrency = publish_concurrency.max(1);
        self
    }

    /// Publish on a detached task. The response never waits on this.
    ///
    /// Returns `None` when the in-flight limit is reached; that batch is
    /// dropped and counted as a publish error.
    pub fn dispatch(
        &self,
        request_id: &str,
        ranked: &[ScoredCandidate],
        telemetry: RequestTelemetry,
    ) -> Option<JoinHandle<()>> {
        let permit = match self.in_flight.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                metrics::record_error(ErrorSite::Publish);
                warn!(request_id, "Telemetry backlog full, dropping batch");
                return None;
            }
        };

        let batch = TelemetryBatch::build(request_id, ranked, telemetry);
        let emitter = self.clone();
        Some(tokio::spawn(async move {
            emitter.publish_batch(batch).await;
            drop(permit);
        }))
    }

    /// Returns the number of events that failed to publish.
    pub async fn publish_batch(&self, batch: TelemetryBatch) -> usize {
        let key = batch.request_id.as_str();
        let events = batch
            .rec_ads
            .iter()
            .map(|event| (self.rec_stream.clone(), serde_json::to_string(event)))
            .chain(
                batch
                    .req_ads
                    .iter()
                    .map(|event| (self.req_stream.clone(), serde_json::to_string(event))),
            )
            .collect::<Vec<_>>();

        let failed = futures::stream::iter(events)
            .map(|(stream, payload)| async move {
                let result = match payload {
                    Ok(payload) => self.send(&stream, key, &payload).await,
                    Err(e) => Err(e.into()),
                };
                self.report(&stream, key, result)
            })
            .buffer_unordered(self.concurrency)
            .filter(|published| futures::future::ready(!*published))
            .count()
            .await;

        debug!(
            request_id = %batch.request_id,
            rec_ads = batch.rec_ads.len(),
            req_ads = batch.req_ads.len(),
            failed,
            "Telemetry published"
        );
        failed
    }

    async fn send(&self, stream: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        match tokio::time::timeout(self.timeout, self.publisher.publish(stream, key, payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    fn report(&self, stream: &str, key: &str, result: Result<(), PublishError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                metrics::record_error(ErrorSite::Publish);
                warn!(stream, request_id = key, error = %e, "Failed to publish telemetry event");
                false
            }
        }
    }
}
