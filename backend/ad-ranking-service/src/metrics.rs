//! Prometheus metrics for the ad ranking pipeline
//!
//! Every failure site has its own `site` label on `ad_ranking_errors_total`
//! so dashboards can localize faults.

use std::time::Instant;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    TextEncoder,
};

static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "ad_ranking_errors_total",
            "Errors raised by the ad ranking pipeline, by failure site",
        ),
        &["site"],
    )
    .expect("failed to create ad_ranking_errors_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register ad_ranking_errors_total");
    counter
});

static STAGE_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "ad_ranking_stage_duration_seconds",
            "Latency of each ranking pipeline stage",
        )
        .buckets(vec![
            0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5,
        ]),
        &["stage"],
    )
    .expect("failed to create ad_ranking_stage_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register ad_ranking_stage_duration_seconds");
    histogram
});

static SNAPSHOT_RELOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "ad_ranking_snapshot_reloads_total",
            "Reference-data snapshot reloads",
        ),
        &["table", "result"],
    )
    .expect("failed to create ad_ranking_snapshot_reloads_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register ad_ranking_snapshot_reloads_total");
    counter
});

static SNAPSHOT_ENTRIES: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "ad_ranking_snapshot_entries",
            "Entries in the currently published snapshot",
        ),
        &["table"],
    )
    .expect("failed to create ad_ranking_snapshot_entries");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register ad_ranking_snapshot_entries");
    gauge
});

static EXPERIMENT_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "ad_ranking_experiment_decisions_total",
            "Experiment policy selected per request",
        ),
        &["decision"],
    )
    .expect("failed to create ad_ranking_experiment_decisions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register ad_ranking_experiment_decisions_total");
    counter
});

static BUDGET_FILTERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "ad_ranking_budget_filtered_total",
        "Creatives dropped for exceeding their daily install cap",
    )
    .expect("failed to create ad_ranking_budget_filtered_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register ad_ranking_budget_filtered_total");
    counter
});

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("ad_ranking_requests_total", "Ranking requests by outcome"),
        &["outcome"],
    )
    .expect("failed to create ad_ranking_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register ad_ranking_requests_total");
    counter
});

/// Named failure sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSite {
    KvMget,
    KvTimeout,
    UserCounterParse,
    UserProfileParse,
    AdInfoRead,
    AdInfoParse,
    AdCounterRead,
    AdCounterParse,
    FieldMaxLen,
    TfFeatureType,
    TfTransport,
    TfTimeout,
    TfModelOutput,
    TfDataType,
    TfTensorSize,
    CtrSize,
    CvrSize,
    Publish,
}

impl ErrorSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSite::KvMget => "kv_mget",
            ErrorSite::KvTimeout => "kv_timeout",
            ErrorSite::UserCounterParse => "user_counter_parse",
            ErrorSite::UserProfileParse => "user_profile_parse",
            ErrorSite::AdInfoRead => "ad_info_read",
            ErrorSite::AdInfoParse => "ad_info_parse",
            ErrorSite::AdCounterRead => "ad_counter_read",
            ErrorSite::AdCounterParse => "ad_counter_parse",
            ErrorSite::FieldMaxLen => "field_max_len",
            ErrorSite::TfFeatureType => "tf_feature_type",
            ErrorSite::TfTransport => "tf_transport",
            ErrorSite::TfTimeout => "tf_timeout",
            ErrorSite::TfModelOutput => "tf_model_output",
            ErrorSite::TfDataType => "tf_data_type",
            ErrorSite::TfTensorSize => "tf_tensor_size",
            ErrorSite::CtrSize => "ctr_size",
            ErrorSite::CvrSize => "cvr_size",
            ErrorSite::Publish => "publish",
        }
    }
}

pub fn record_error(site: ErrorSite) {
    ERRORS_TOTAL.with_label_values(&[site.as_str()]).inc();
}

pub fn error_count(site: ErrorSite) -> u64 {
    ERRORS_TOTAL.with_label_values(&[site.as_str()]).get()
}

pub fn record_snapshot_reload(table: &str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    SNAPSHOT_RELOADS_TOTAL
        .with_label_values(&[table, result])
        .inc();
}

pub fn set_snapshot_entries(table: &str, entries: usize) {
    SNAPSHOT_ENTRIES
        .with_label_values(&[table])
        .set(entries as i64);
}

pub fn record_experiment_decision(decision: &str) {
    EXPERIMENT_DECISIONS_TOTAL
        .with_label_values(&[decision])
        .inc();
}

pub fn record_budget_filtered(count: usize) {
    BUDGET_FILTERED_TOTAL.inc_by(count as u64);
}

pub fn record_request(outcome: &str) {
    REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Observes the elapsed time of a pipeline stage when dropped.
pub struct StageTimer {
    stage: &'static str,
    started: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            stage,
            started: Instant::now(),
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        STAGE_DURATION_SECONDS
            .with_label_values(&[self.stage])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
