use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::services::scoring::PolicyConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("policy config: {0}")]
    Policy(#[from] envy::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub redis: RedisConfig,
    pub snapshot: SnapshotConfig,
    pub inference: InferenceConfig,
    pub telemetry: TelemetryConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub service_name: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub timeout_ms: u64,
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub data_path: String,
    pub sub_dir: String,
    pub poll_interval_secs: u64,
}

impl SnapshotConfig {
    pub fn ad_info_path(&self) -> PathBuf {
        PathBuf::from(&self.data_path)
            .join(&self.sub_dir)
            .join("ad_info.pb")
    }

    pub fn ad_counter_path(&self) -> PathBuf {
        PathBuf::from(&self.data_path)
            .join(&self.sub_dir)
            .join("ad_counter.pb")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model_name: String,
    pub output_name: String,
    pub timeout_ms: u64,
    /// JSON field dictionary; the built-in dictionary is used when unset
    pub model_spec_path: Option<String>,
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetrySink {
    Redis,
    Kafka,
}

impl FromStr for TelemetrySink {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(TelemetrySink::Redis),
            "kafka" => Ok(TelemetrySink::Kafka),
            other => Err(format!("unknown telemetry sink {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub sink: TelemetrySink,
    pub rec_ads_stream: String,
    pub req_ads_stream: String,
    /// Approximate cap applied on XADD
    pub stream_maxlen: usize,
    pub kafka_brokers: String,
    pub publish_timeout_ms: u64,
    /// Requests whose telemetry may be publishing at once
    pub max_in_flight_batches: usize,
    /// Concurrent publishes within one batch
    pub publish_concurrency: usize,
}

impl TelemetryConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            service: ServiceConfig {
                http_port: env_or("HTTP_PORT", "8012")?,
                service_name: env_or("SERVICE_NAME", "ad-ranking-service")?,
            },
            redis: RedisConfig {
                url: env_or("REDIS_URL", "redis://localhost:6379")?,
                timeout_ms: env_or("REDIS_TIMEOUT_MS", "20")?,
            },
            snapshot: SnapshotConfig {
                data_path: env_or("AD_DATA_PATH", "/data")?,
                sub_dir: env_or("AD_DATA_SUB_DIR", "ads")?,
                poll_interval_secs: env_or("SNAPSHOT_POLL_INTERVAL_SECS", "10")?,
            },
            inference: InferenceConfig {
                base_url: env_or("TF_SERVING_URL", "http://localhost:8501")?,
                model_name: env_or("TF_MODEL_NAME", "dnn_model_t1")?,
                output_name: env_or("TF_MODEL_OUTPUT", "predictions")?,
                timeout_ms: env_or("TF_TIMEOUT_MS", "50")?,
                model_spec_path: env::var("MODEL_SPEC_PATH").ok().filter(|p| !p.is_empty()),
            },
            telemetry: TelemetryConfig {
                sink: env_or("TELEMETRY_SINK", "redis")?,
                rec_ads_stream: env_or("REC_ADS_STREAM", "ad_rec_ads")?,
                req_ads_stream: env_or("REQ_ADS_STREAM", "ad_req_ads")?,
                stream_maxlen: env_or("TELEMETRY_STREAM_MAXLEN", "1000000")?,
                kafka_brokers: env_or("KAFKA_BROKERS", "localhost:9092")?,
                publish_timeout_ms: env_or("TELEMETRY_PUBLISH_TIMEOUT_MS", "200")?,
                max_in_flight_batches: env_or("TELEMETRY_MAX_IN_FLIGHT", "256")?,
                publish_concurrency: env_or("TELEMETRY_PUBLISH_CONCURRENCY", "32")?,
            },
            policy: envy::prefixed("AD_POLICY_").from_env::<PolicyConfig>()?,
        })
    }
}

fn env_or<T>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_paths() {
        let cfg = SnapshotConfig {
            data_path: "/data".to_string(),
            sub_dir: "ads".to_string(),
            poll_interval_secs: 0,
        };
        assert_eq!(cfg.ad_info_path(), PathBuf::from("/data/ads/ad_info.pb"));
        assert_eq!(
            cfg.ad_counter_path(),
            PathBuf::from("/data/ads/ad_counter.pb")
        );
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_env_or_reports_bad_values() {
        env::set_var("AD_RANKING_TEST_PORT", "not-a-port");
        let result: Result<u16, _> = env_or("AD_RANKING_TEST_PORT", "8012");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        let fallback: u16 = env_or("AD_RANKING_TEST_UNSET_PORT", "8012").unwrap();
        assert_eq!(fallback, 8012);
    }

    #[test]
    fn test_telemetry_sink_parse() {
        assert_eq!("Kafka".parse::<TelemetrySink>(), Ok(TelemetrySink::Kafka));
        assert!("s3".parse::<TelemetrySink>().is_err());
    }
}
