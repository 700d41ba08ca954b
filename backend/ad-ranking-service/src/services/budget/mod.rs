use tracing::debug;

use crate::metrics;
use crate::models::FeatureRecord;

/// Drop ads whose attributed installs today exceed their daily cap.
///
/// A cap of 0 (or unset) is uncapped. Order of the survivors is preserved.
pub fn filter_over_cap(records: Vec<FeatureRecord>) -> Vec<FeatureRecord> {
    let before = records.len();

    let kept: Vec<FeatureRecord> = records
        .into_iter()
        .filter(|record| {
            let cap = record.ad_info.day_attr_install_cap;
            let installs = record.ad_counter.ad_id.billing_day().attr_install;
            let over_cap = cap > 0 && installs > cap as f64;
            if over_cap {
                debug!(
                    ad_id = record.ad_info.ad_id,
                    creative_id = %record.ad_info.creative_id,
                    cap,
                    installs,
                    "Dropping ad over daily install cap"
                );
            }
            !over_cap
        })
        .collect();

    metrics::record_budget_filtered(before - kept.len());
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CountFeatures;

    fn record(creative_id: &str, cap: i64, installs: f64) -> FeatureRecord {
        let mut record = FeatureRecord::default();
        record.ad_info.creative_id = creative_id.to_string();
        record.ad_info.day_attr_install_cap = cap;
        record.ad_counter.ad_id.count_features_bj_1d = Some(CountFeatures {
            imp: 0.0,
            click: 0.0,
            attr_install: installs,
        });
        record
    }

    fn ids(records: &[FeatureRecord]) -> Vec<&str> {
        records
            .iter()
            .map(|r| r.ad_info.creative_id.as_str())
            .collect()
    }

    #[test]
    fn test_over_cap_is_removed() {
        let kept = filter_over_cap(vec![record("a", 100, 150.0)]);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_zero_cap_is_uncapped() {
        let kept = filter_over_cap(vec![record("a", 0, 150.0)]);
        assert_eq!(ids(&kept), vec!["a"]);
    }

    #[test]
    fn test_under_cap_is_kept() {
        let kept = filter_over_cap(vec![record("a", 100, 50.0)]);
        assert_eq!(ids(&kept), vec!["a"]);
    }

    #[test]
    fn test_order_preserved() {
        let kept = filter_over_cap(vec![
            record("a", 10, 1.0),
            record("b", 10, 11.0),
            record("c", 0, 99.0),
            record("d", 10, 10.0),
        ]);
        assert_eq!(ids(&kept), vec!["a", "c", "d"]);
    }
}
