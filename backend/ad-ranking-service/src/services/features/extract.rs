//! Flattens a [`FeatureRecord`] into the named float, int and sequence
//! fields the CTR model consumes.

use chrono::{TimeZone, Timelike, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::models::{CounterBundle, FeatureRecord};

pub const FLOAT_FIELDS: &[&str] = &[
    "bid_price",
    "ad_ctr_7d",
    "ad_cvr_7d",
    "package_ctr_7d",
    "package_cvr_7d",
    "category_ctr_7d",
    "category_cvr_7d",
    "creative_ctr_7d",
    "creative_cvr_7d",
    "pos_ad_ctr_7d",
    "user_ad_imp_7d",
    "user_ad_click_7d",
    "user_package_imp_7d",
    "user_ctr_7d",
];

pub const INT_FIELDS: &[&str] = &[
    "pos_id",
    "network_type",
    "brand",
    "model",
    "language",
    "os_version",
    "app_name",
    "ad_id",
    "app_id",
    "category",
    "creative_id",
    "attr_platform",
    "is_auto_download",
    "user_age",
    "user_gender",
    "req_hour",
];

pub const SEQUENCE_FIELDS: &[&str] = &["user_click_camp_ids", "user_install_camp_ids"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelFeatures {
    pub float_features: HashMap<String, f32>,
    pub int_features: HashMap<String, i64>,
    pub sequence_features: HashMap<String, Vec<i64>>,
}

/// Stable non-negative id for a categorical string. Empty maps to 0.
pub fn hash_id(value: &str) -> i64 {
    if value.is_empty() {
        return 0;
    }
    let digest = Sha256::digest(value.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) & i64::MAX as u64) as i64
}

fn ratio(num: f64, den: f64) -> f32 {
    if den > 0.0 {
        (num / den) as f32
    } else {
        0.0
    }
}

fn ctr_7d(bundle: &CounterBundle) -> f32 {
    let c = bundle.seven_day();
    ratio(c.click, c.imp)
}

fn cvr_7d(bundle: &CounterBundle) -> f32 {
    let c = bundle.seven_day();
    ratio(c.attr_install, c.click)
}

pub fn extract_model_features(record: &FeatureRecord) -> ModelFeatures {
    let ctx = &record.context;
    let ad = &record.ad_info;
    let ad_counter = &record.ad_counter;
    let user_ad = &record.user_ad_counter;
    let profile = &record.user_profile;

    let float_features = [
        ("bid_price", ad.bid_price as f32),
        ("ad_ctr_7d", ctr_7d(&ad_counter.ad_id)),
        ("ad_cvr_7d", cvr_7d(&ad_counter.ad_id)),
        ("package_ctr_7d", ctr_7d(&ad_counter.ad_package_name)),
        ("package_cvr_7d", cvr_7d(&ad_counter.ad_package_name)),
        ("category_ctr_7d", ctr_7d(&ad_counter.ad_package_category)),
        ("category_cvr_7d", cvr_7d(&ad_counter.ad_package_category)),
        ("creative_ctr_7d", ctr_7d(&ad_counter.c_id)),
        ("creative_cvr_7d", cvr_7d(&ad_counter.c_id)),
        ("pos_ad_ctr_7d", ctr_7d(&ad_counter.pos_id_ad_id)),
        ("user_ad_imp_7d", user_ad.user_id_ad_id.seven_day().imp as f32),
        ("user_ad_click_7d", user_ad.user_id_ad_id.seven_day().click as f32),
        (
            "user_package_imp_7d",
            user_ad.user_id_ad_package_name.seven_day().imp as f32,
        ),
        ("user_ctr_7d", ctr_7d(&profile.user_counter)),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect();

    let req_hour = Utc
        .timestamp_millis_opt(ctx.req_time)
        .single()
        .map(|t| t.hour() as i64)
        .unwrap_or(0);

    let int_features = [
        ("pos_id", hash_id(&ctx.pos_id)),
        ("network_type", hash_id(&ctx.network_type)),
        ("brand", hash_id(&ctx.brand)),
        ("model", hash_id(&ctx.model)),
        ("language", hash_id(&ctx.language)),
        ("os_version", hash_id(&ctx.os_version)),
        ("app_name", hash_id(&ctx.app_name)),
        ("ad_id", ad.ad_id),
        ("app_id", hash_id(&ad.app_id)),
        ("category", hash_id(&ad.category)),
        ("creative_id", hash_id(&ad.creative_id)),
        ("attr_platform", hash_id(&ad.attr_platform)),
        ("is_auto_download", ad.is_auto_download as i64),
        ("user_age", profile.user_base.age),
        ("user_gender", profile.user_base.gender),
        ("req_hour", req_hour),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect();

    let sequence_features = [
        (
            "user_click_camp_ids",
            profile.user_behavior.click_camp_ids.clone(),
        ),
        (
            "user_install_camp_ids",
            profile.user_behavior.install_camp_ids.clone(),
        ),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect();

    ModelFeatures {
        float_features,
        int_features,
        sequence_features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CountFeatures;

    #[test]
    fn test_hash_id_is_stable_and_non_negative() {
        assert_eq!(hash_id(""), 0);
        assert_eq!(hash_id("com.example"), hash_id("com.example"));
        assert_ne!(hash_id("com.example"), hash_id("com.other"));
        assert!(hash_id("com.example") > 0);
    }

    #[test]
    fn test_every_declared_field_is_extracted() {
        let features = extract_model_features(&FeatureRecord::default());

        for name in FLOAT_FIELDS {
            assert!(features.float_features.contains_key(*name), "{}", name);
        }
        for name in INT_FIELDS {
            assert!(features.int_features.contains_key(*name), "{}", name);
        }
        for name in SEQUENCE_FIELDS {
            assert!(features.sequence_features.contains_key(*name), "{}", name);
        }
        assert_eq!(features.float_features.len(), FLOAT_FIELDS.len());
        assert_eq!(features.int_features.len(), INT_FIELDS.len());
    }

    #[test]
    fn test_ratios_and_raw_values() {
        let mut record = FeatureRecord::default();
        record.ad_info.ad_id = 42;
        record.ad_info.bid_price = 1.5;
        record.ad_counter.ad_id.count_features_7d = Some(CountFeatures {
            imp: 1000.0,
            click: 50.0,
            attr_install: 5.0,
        });
        record.context.req_time = 3 * 3_600_000 + 1;
        record.user_profile.user_behavior.click_camp_ids = vec![7, 8];

        let features = extract_model_features(&record);
        assert_eq!(features.float_features["bid_price"], 1.5);
        assert!((features.float_features["ad_ctr_7d"] - 0.05).abs() < 1e-6);
        assert!((features.float_features["ad_cvr_7d"] - 0.1).abs() < 1e-6);
        assert_eq!(features.float_features["creative_ctr_7d"], 0.0);
        assert_eq!(features.int_features["ad_id"], 42);
        assert_eq!(features.int_features["req_hour"], 3);
        assert_eq!(features.sequence_features["user_click_camp_ids"], vec![7, 8]);
    }
}
