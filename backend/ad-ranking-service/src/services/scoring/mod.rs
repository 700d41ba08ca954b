// ============================================
// Scorer & Policy Engine
// ============================================
// Picks one experiment policy per request, turns CTR × CVR into a score and
// ecpm per record, and builds both telemetry views alongside.

pub mod beta;

pub use beta::BetaSampler;

use rand::Rng;
use rand_distr::Distribution;
use serde::Deserialize;
use tracing::error;

use crate::error::RecError;
use crate::metrics::{self, ErrorSite, StageTimer};
use crate::models::{
    AdLogRecord, AdRequest, CreativeAge, ExperimentDecision, FeatureRecord, RecAdRecord,
    RequestTelemetry, ScoredCandidate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExploreMode {
    /// Uniform score inside `[explore_low, explore_up]`
    Randomized,
    /// Beta sample around the base score
    Bayesian,
}

/// Experiment tunables, read from `AD_POLICY_*`.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Draws in `[1, explore_upper]` explore
    #[serde(default = "default_explore_upper")]
    pub explore_upper: u32,
    /// Draws in `(explore_upper, cold_start_upper]` boost new creatives
    #[serde(default = "default_cold_start_upper")]
    pub cold_start_upper: u32,
    #[serde(default = "default_explore_low")]
    pub explore_low: f64,
    #[serde(default = "default_explore_up")]
    pub explore_up: f64,
    #[serde(default = "default_explore_mode")]
    pub explore_mode: ExploreMode,
    /// Pseudo-impressions backing the Bayesian explore prior
    #[serde(default = "default_exposure_weight")]
    pub exposure_weight: f64,
}

fn default_explore_upper() -> u32 {
    15
}

fn default_cold_start_upper() -> u32 {
    20
}

fn default_explore_low() -> f64 {
    0.0002
}

fn default_explore_up() -> f64 {
    0.005
}

fn default_explore_mode() -> ExploreMode {
    ExploreMode::Randomized
}

fn default_exposure_weight() -> f64 {
    1000.0
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            explore_upper: default_explore_upper(),
            cold_start_upper: default_cold_start_upper(),
            explore_low: default_explore_low(),
            explore_up: default_explore_up(),
            explore_mode: default_explore_mode(),
            exposure_weight: default_exposure_weight(),
        }
    }
}

impl PolicyConfig {
    /// One uniform draw in `[1, 100]` per request
    pub fn decide<R: Rng + ?Sized>(&self, rng: &mut R) -> ExperimentDecision {
        self.decision_for(rng.gen_range(1..=100))
    }

    pub fn decision_for(&self, draw: u32) -> ExperimentDecision {
        if draw <= self.explore_upper {
            ExperimentDecision::Explore
        } else if draw <= self.cold_start_upper {
            ExperimentDecision::ColdStartBoost
        } else {
            ExperimentDecision::Control
        }
    }

    pub fn explore_score<R: Rng + ?Sized>(&self, base: f64, rng: &mut R) -> f64 {
        match self.explore_mode {
            ExploreMode::Randomized => {
                let r: u32 = rng.gen_range(1..=1000);
                (self.explore_up - self.explore_low) * r as f64 / 1000.0 + self.explore_low
            }
            ExploreMode::Bayesian => {
                let alpha = base * self.exposure_weight;
                let beta = self.exposure_weight - alpha;
                BetaSampler::new(alpha, beta).sample(rng)
            }
        }
    }
}

/// CTR × CVR, with implausible products replaced by 0.01
pub fn base_score(ctr: f64, cvr: f64) -> f64 {
    let score = ctr * cvr;
    if score > 0.999 {
        0.01
    } else {
        score
    }
}

pub fn ecpm(score: f64, bid_price: f64, floor_price: f64) -> f64 {
    floor_price.max(score * 1000.0 * bid_price)
}

pub type Scored = (Vec<ScoredCandidate>, RequestTelemetry);

/// Score every record and build the per-request telemetry.
///
/// `ctr` and `cvr` must line up one-to-one with `records`; any mismatch aborts.
pub fn score_candidates<R: Rng + ?Sized>(
    request: &AdRequest,
    records: &[FeatureRecord],
    ctr: &[f64],
    cvr: &[f64],
    decision: ExperimentDecision,
    policy: &PolicyConfig,
    rng: &mut R,
) -> Result<Scored, RecError> {
    let _timer = StageTimer::start("score");

    if ctr.len() != records.len() {
        metrics::record_error(ErrorSite::CtrSize);
        error!(ctr = ctr.len(), candidates = records.len(), "CTR size mismatch");
        return Err(RecError::CtrSizeMismatch {
            ctr: ctr.len(),
            records: records.len(),
        });
    }
    if cvr.len() != records.len() {
        metrics::record_error(ErrorSite::CvrSize);
        error!(cvr = cvr.len(), records = records.len(), "CVR size mismatch");
        return Err(RecError::CvrSizeMismatch {
            cvr: cvr.len(),
            records: records.len(),
        });
    }

    let explore = decision == ExperimentDecision::Explore;
    let floor_price = request.contexts.floor_price;

    let mut scored = Vec::with_capacity(records.len());
    let mut telemetry = RequestTelemetry {
        req_ads: Vec::with_capacity(records.len()),
        ..Default::default()
    };

    for ((record, &pctr), &pcvr) in records.iter().zip(ctr).zip(cvr) {
        let ad = &record.ad_info;
        let base = base_score(pctr, pcvr);
        let score = if explore {
            policy.explore_score(base, rng)
        } else {
            base
        };

        scored.push(ScoredCandidate {
            creative_id: ad.creative_id.clone(),
            camp_id: ad.ad_id,
            app_id: ad.app_id.clone(),
            pctr,
            pcvr,
            score,
            ecpm: ecpm(score, ad.bid_price, floor_price),
            age: CreativeAge {
                created_at: ad.creative_create_time,
                impressions_7d: record.ad_counter.c_id.seven_day().imp,
            },
        });

        let log = AdLogRecord {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            pos_id: request.pos_id.clone(),
            nation: request.nation.clone(),
            package_name: request.contexts.package_name.clone(),
            floor_price,
            creative_id: ad.creative_id.clone(),
            camp_id: ad.ad_id,
            app_id: ad.app_id.clone(),
            req_time: record.context.req_time,
            bid_price: ad.bid_price,
            pctr,
            pcvr,
            explore_flow: explore,
            new_ad_flow: false,
        };
        telemetry.req_ads.push(log.clone());
        telemetry.rec_ads.insert(
            ad.creative_id.clone(),
            RecAdRecord {
                log,
                feature: record.clone(),
            },
        );
    }

    Ok((scored, telemetry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record(creative_id: &str, bid_price: f64) -> FeatureRecord {
        let mut record = FeatureRecord::default();
        record.ad_info.creative_id = creative_id.to_string();
        record.ad_info.ad_id = 9;
        record.ad_info.bid_price = bid_price;
        record.context.req_time = 1234;
        record
    }

    fn request(floor_price: f64) -> AdRequest {
        let mut request = AdRequest {
            request_id: "r1".to_string(),
            user_id: "u1".to_string(),
            ..Default::default()
        };
        request.contexts.floor_price = floor_price;
        request
    }

    #[test]
    fn test_decision_thresholds() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.decision_for(1), ExperimentDecision::Explore);
        assert_eq!(policy.decision_for(15), ExperimentDecision::Explore);
        assert_eq!(policy.decision_for(16), ExperimentDecision::ColdStartBoost);
        assert_eq!(policy.decision_for(20), ExperimentDecision::ColdStartBoost);
        assert_eq!(policy.decision_for(21), ExperimentDecision::Control);
        assert_eq!(policy.decision_for(100), ExperimentDecision::Control);
    }

    #[test]
    fn test_decide_covers_all_policies() {
        let policy = PolicyConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = [0usize; 3];
        for _ in 0..10_000 {
            match policy.decide(&mut rng) {
                ExperimentDecision::Explore => seen[0] += 1,
                ExperimentDecision::ColdStartBoost => seen[1] += 1,
                ExperimentDecision::Control => seen[2] += 1,
            }
        }
        assert!((1_200..1_800).contains(&seen[0]), "{:?}", seen);
        assert!((300..700).contains(&seen[1]), "{:?}", seen);
    }

    #[test]
    fn test_base_score_clamp() {
        assert_eq!(base_score(0.1, 0.2), 0.1 * 0.2);
        assert_eq!(base_score(1.0, 1.0), 0.01);
    }

    #[test]
    fn test_ecpm_respects_floor() {
        assert!((ecpm(0.001, 2.0, 0.5) - 2.0).abs() < 1e-12);
        assert_eq!(ecpm(0.0001, 2.0, 0.5), 0.5);
    }

    #[test]
    fn test_randomized_explore_within_band() {
        let policy = PolicyConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..5_000 {
            let s = policy.explore_score(0.5, &mut rng);
            assert!(s >= policy.explore_low && s <= policy.explore_up + 1e-12, "{}", s);
        }
    }

    #[test]
    fn test_bayesian_explore_is_probability() {
        let policy = PolicyConfig {
            explore_mode: ExploreMode::Bayesian,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        for base in [0.0, 0.003, 0.01, 0.5] {
            let s = policy.explore_score(base, &mut rng);
            assert!((0.0..=1.0).contains(&s), "{} -> {}", base, s);
        }
    }

    #[test]
    fn test_size_mismatch_aborts() {
        let records = vec![record("a", 1.0), record("b", 1.0)];
        let policy = PolicyConfig::default();
        let mut rng = StdRng::seed_from_u64(0);

        let result = score_candidates(
            &request(0.0),
            &records,
            &[0.1],
            &[0.1, 0.1],
            ExperimentDecision::Control,
            &policy,
            &mut rng,
        );
        assert!(matches!(
            result,
            Err(RecError::CtrSizeMismatch {
                ctr: 1,
                records: 2
            })
        ));

        let result = score_candidates(
            &request(0.0),
            &records,
            &[0.1, 0.1],
            &[0.1, 0.1, 0.1],
            ExperimentDecision::Control,
            &policy,
            &mut rng,
        );
        assert!(matches!(
            result,
            Err(RecError::CvrSizeMismatch { cvr: 3, records: 2 })
        ));
    }

    #[test]
    fn test_scores_and_telemetry_views_match() {
        let records = vec![record("a", 2.0), record("b", 1.0)];
        let mut rng = StdRng::seed_from_u64(0);

        let (scored, telemetry) = score_candidates(
            &request(0.01),
            &records,
            &[0.1, 0.2],
            &[0.05, 0.01],
            ExperimentDecision::Control,
            &PolicyConfig::default(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(scored.len(), 2);
        assert!((scored[0].score - 0.005).abs() < 1e-12);
        assert!((scored[0].ecpm - 10.0).abs() < 1e-9);
        assert_eq!(telemetry.req_ads.len(), 2);
        assert_eq!(telemetry.rec_ads.len(), 2);
        assert_eq!(telemetry.rec_ads["a"].log, telemetry.req_ads[0]);
        assert_eq!(telemetry.req_ads[1].req_time, 1234);
        assert!(!telemetry.req_ads[0].explore_flow);
    }

    #[test]
    fn test_explore_marks_flow() {
        let records = vec![record("a", 1.0)];
        let mut rng = StdRng::seed_from_u64(0);
        let policy = PolicyConfig::default();

        let (scored, telemetry) = score_candidates(
            &request(0.0),
            &records,
            &[0.9],
            &[0.9],
            ExperimentDecision::Explore,
            &policy,
            &mut rng,
        )
        .unwrap();

        assert!(scored[0].score >= policy.explore_low);
        assert!(scored[0].score <= policy.explore_up + 1e-12);
        assert!(telemetry.rec_ads["a"].log.explore_flow);
    }
}
