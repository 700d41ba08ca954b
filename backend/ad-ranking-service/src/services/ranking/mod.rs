/// Ranker
///
/// Orders scored candidates by ecpm and cuts to the requested count. The
/// cold-start policy lifts young, low-impression creatives to the front.
use rand::seq::SliceRandom;
use rand::Rng;
use std::cmp::Ordering;
use tracing::debug;

use crate::metrics::StageTimer;
use crate::models::{CreativeAge, ExperimentDecision, RequestTelemetry, ScoredCandidate};

/// Creatives younger than three days are candidates for the boost
pub const NEW_CREATIVE_MAX_AGE_SECS: i64 = 3 * 24 * 3600;
pub const NEW_CREATIVE_MAX_IMPRESSIONS: f64 = 10_000.0;

pub fn is_new_creative(age: &CreativeAge, now_secs: i64) -> bool {
    now_secs - age.created_at < NEW_CREATIVE_MAX_AGE_SECS
        && age.impressions_7d < NEW_CREATIVE_MAX_IMPRESSIONS
}

fn sort_by_ecpm(scored: &mut [ScoredCandidate]) {
    // sort_by is stable; equal ecpm keeps scoring order
    scored.sort_by(|a, b| b.ecpm.partial_cmp(&a.ecpm).unwrap_or(Ordering::Equal));
}

/// Top `min(requested, n)` by descending ecpm.
pub fn rank(mut scored: Vec<ScoredCandidate>, requested: usize) -> Vec<ScoredCandidate> {
    let limit = requested.min(scored.len());
    sort_by_ecpm(&mut scored);
    scored.truncate(limit);
    scored
}

/// New creatives first (shuffled), then the rest in ecpm order, capped at
/// `limit`. Flags `new_ad_flow` on every new creative's keyed telemetry.
/// Returns the input order unchanged when nothing qualifies.
pub fn cold_start_boost<R: Rng + ?Sized>(
    sorted: Vec<ScoredCandidate>,
    limit: usize,
    telemetry: &mut RequestTelemetry,
    now_secs: i64,
    rng: &mut R,
) -> Vec<ScoredCandidate> {
    let (mut fresh, old): (Vec<_>, Vec<_>) = sorted
        .into_iter()
        .partition(|c| is_new_creative(&c.age, now_secs));

    if fresh.is_empty() {
        let mut out = old;
        out.truncate(limit);
        return out;
    }

    for candidate in &fresh {
        if let Some(rec) = telemetry.rec_ads.get_mut(&candidate.creative_id) {
            rec.log.new_ad_flow = true;
        }
    }
    debug!(new = fresh.len(), old = old.len(), "Boosting new creatives");

    fresh.shuffle(rng);
    fresh.extend(old);
    fresh.truncate(limit);
    fresh
}

/// Sort, apply the request's experiment policy, and cut to the requested count.
pub fn rank_for_decision<R: Rng + ?Sized>(
    scored: Vec<ScoredCandidate>,
    requested: usize,
    decision: ExperimentDecision,
    telemetry: &mut RequestTelemetry,
    now_secs: i64,
    rng: &mut R,
) -> Vec<ScoredCandidate> {
    let _timer = StageTimer::start("rank");

    if decision != ExperimentDecision::ColdStartBoost {
        return rank(scored, requested);
    }

    let limit = requested.min(scored.len());
    let mut sorted = scored;
    sort_by_ecpm(&mut sorted);
    cold_start_boost(sorted, limit, telemetry, now_secs, rng)
}
