pub mod feature;
pub mod store;

pub use feature::{
    AdCounterFeatures, AdInfoFeatures, FeatureContext, FeatureRecord, UserAdCounterFeatures,
    UserProfileFeatures,
};
pub use store::{
    AdCounterTable, AdInfoEntry, AdInfoTable, CountFeatures, CounterBundle, UserBase,
    UserBehavior, UserCounterBlob, UserProfileBlob,
};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inbound ranking request. Immutable for the lifetime of one ranking call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdRequest {
    pub request_id: String,
    pub user_id: String,
    pub user_ip: String,
    pub pos_id: String,
    pub nation: String,
    pub creatives: Vec<CandidateAd>,
    pub contexts: RequestContext,
    /// Experiment parameter name → integer flag
    pub exp_params: HashMap<String, i32>,
}

impl AdRequest {
    pub fn exp_flag(&self, name: &str) -> Option<i32> {
        self.exp_params.get(name).copied()
    }

    /// Total creatives across all candidates
    pub fn creative_count(&self) -> usize {
        self.creatives.iter().map(|c| c.creative.len()).sum()
    }
}

/// One campaign offered for this slot, with one or more creatives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateAd {
    pub camp_id: i64,
    pub app_id: String,
    pub bid_price: f64,
    pub creative: Vec<Creative>,
    pub attr_platform: String,
    pub is_auto_download: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Creative {
    pub creative_id: String,
    pub cp_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    pub network_type: String,
    pub os_version: String,
    pub brand: String,
    pub model: String,
    pub language: String,
    pub app_version_code: String,
    pub package_name: String,
    pub floor_price: f64,
    /// Requested result count
    pub ad_count: u32,
}

/// Experiment policy chosen once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentDecision {
    Control,
    Explore,
    ColdStartBoost,
}

impl ExperimentDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentDecision::Control => "control",
            ExperimentDecision::Explore => "explore",
            ExperimentDecision::ColdStartBoost => "cold_start_boost",
        }
    }
}

/// Creative signals the cold-start pass needs after sorting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CreativeAge {
    /// Creative creation time (unix seconds)
    pub created_at: i64,
    /// Creative-level 7-day impressions
    pub impressions_7d: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub creative_id: String,
    pub camp_id: i64,
    pub app_id: String,
    pub pctr: f64,
    pub pcvr: f64,
    pub score: f64,
    pub ecpm: f64,
    #[serde(skip)]
    pub age: CreativeAge,
}

/// Per-candidate log line shared by both telemetry streams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdLogRecord {
    pub request_id: String,
    pub user_id: String,
    pub pos_id: String,
    pub nation: String,
    pub package_name: String,
    pub floor_price: f64,
    pub creative_id: String,
    pub camp_id: i64,
    pub app_id: String,
    /// Request time (unix millis)
    pub req_time: i64,
    pub bid_price: f64,
    pub pctr: f64,
    pub pcvr: f64,
    pub explore_flow: bool,
    pub new_ad_flow: bool,
}

/// Keyed telemetry view: the log line plus the feature snapshot it was scored from.
#[derive(Debug, Clone, Serialize)]
pub struct RecAdRecord {
    #[serde(flatten)]
    pub log: AdLogRecord,
    pub feature: FeatureRecord,
}

/// Telemetry accumulated over one ranking call.
#[derive(Debug, Clone, Default)]
pub struct RequestTelemetry {
    /// Every scored candidate, pre-truncation, in scoring order
    pub req_ads: Vec<AdLogRecord>,
    /// Scored candidates keyed by creative id
    pub rec_ads: HashMap<String, RecAdRecord>,
}
