use serde::Serialize;

use super::store::{CounterBundle, UserBase, UserBehavior};

/// One (candidate, creative) pair joined with everything known about it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureRecord {
    pub context: FeatureContext,
    pub user_profile: UserProfileFeatures,
    pub ad_info: AdInfoFeatures,
    pub ad_counter: AdCounterFeatures,
    pub user_ad_counter: UserAdCounterFeatures,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureContext {
    pub pos_id: String,
    pub network_type: String,
    pub os_version: String,
    pub brand: String,
    pub model: String,
    pub language: String,
    pub app_version_code: String,
    /// Publisher package name
    pub app_name: String,
    pub client_ip: String,
    /// Unix millis
    pub req_time: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserProfileFeatures {
    pub user_id: String,
    pub user_base: UserBase,
    pub user_behavior: UserBehavior,
    pub user_counter: CounterBundle,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdInfoFeatures {
    pub ad_id: i64,
    pub app_id: String,
    pub category: String,
    pub day_attr_install_cap: i64,
    pub attr_platform: String,
    pub is_auto_download: bool,
    pub bid_price: f64,
    pub creative_id: String,
    pub cp_id: String,
    /// Unix seconds
    pub creative_create_time: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdCounterFeatures {
    pub ad_id: CounterBundle,
    pub ad_package_name: CounterBundle,
    pub ad_package_category: CounterBundle,
    pub pos_id_ad_id: CounterBundle,
    pub pos_id_ad_package_name: CounterBundle,
    pub pos_id_ad_package_category: CounterBundle,
    pub c_id: CounterBundle,
    pub pos_id_c_id: CounterBundle,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserAdCounterFeatures {
    pub user_id_ad_id: CounterBundle,
    pub user_id_ad_package_name: CounterBundle,
    pub user_id_ad_package_category: CounterBundle,
    pub user_id_pos_id_ad_id: CounterBundle,
    pub user_id_pos_id_ad_package_name: CounterBundle,
    pub user_id_pos_id_ad_package_category: CounterBundle,
    pub user_id_c_id: CounterBundle,
    pub user_id_pos_id_c_id: CounterBundle,
}
