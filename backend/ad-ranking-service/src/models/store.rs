//! Protobuf tables shared with the offline pipelines.
//!
//! Reference snapshots (`ad_info.pb`, `ad_counter.pb`) and the per-user blobs
//! stored in the key-value store are encoded with these messages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Counts over one time window
#[derive(Clone, Copy, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct CountFeatures {
    #[prost(double, tag = "1")]
    pub imp: f64,
    #[prost(double, tag = "2")]
    pub click: f64,
    #[prost(double, tag = "3")]
    pub attr_install: f64,
}

/// Counters for one composite key across windows
#[derive(Clone, Copy, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct CounterBundle {
    #[prost(message, optional, tag = "1")]
    pub count_features_1d: Option<CountFeatures>,
    #[prost(message, optional, tag = "2")]
    pub count_features_7d: Option<CountFeatures>,
    /// Daily window aligned to the billing day
    #[prost(message, optional, tag = "3")]
    pub count_features_bj_1d: Option<CountFeatures>,
}

impl CounterBundle {
    pub fn seven_day(&self) -> CountFeatures {
        self.count_features_7d.unwrap_or_default()
    }

    pub fn billing_day(&self) -> CountFeatures {
        self.count_features_bj_1d.unwrap_or_default()
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct AdInfoEntry {
    #[prost(string, tag = "1")]
    pub category: String,
    /// Daily attributed-install cap; 0 means uncapped
    #[prost(int64, tag = "2")]
    pub day_attr_install_cap: i64,
    /// Unix seconds
    #[prost(int64, tag = "3")]
    pub creative_create_time: i64,
}

/// Ad metadata keyed by `<app_id>`, `ad_id#<id>` or `c_id#<creative>`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdInfoTable {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(map = "string, message", tag = "2")]
    pub ad_infos: HashMap<String, AdInfoEntry>,
}

/// Ad-side counters keyed by composite strings.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdCounterTable {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(map = "string, message", tag = "2")]
    pub store_ad_counter: HashMap<String, CounterBundle>,
}

/// Value under `user-counter:<user_id>`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserCounterBlob {
    #[prost(map = "string, message", tag = "1")]
    pub store_user_counter: HashMap<String, CounterBundle>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct UserBase {
    #[prost(int64, tag = "1")]
    pub age: i64,
    #[prost(int64, tag = "2")]
    pub gender: i64,
    #[prost(string, tag = "3")]
    pub country: String,
    #[prost(string, tag = "4")]
    pub city: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct UserBehavior {
    /// Most recent first
    #[prost(int64, repeated, tag = "1")]
    pub click_camp_ids: Vec<i64>,
    #[prost(int64, repeated, tag = "2")]
    pub install_camp_ids: Vec<i64>,
}

/// Value under `user-profile:<user_id>`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserProfileBlob {
    #[prost(message, optional, tag = "1")]
    pub user_base: Option<UserBase>,
    #[prost(message, optional, tag = "2")]
    pub user_behavior: Option<UserBehavior>,
}
