use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use crate::error::RecError;
use crate::metrics::{self, StageTimer};
use crate::models::{AdRequest, ScoredCandidate};
use crate::services::estimator::{CtrStrategy, Estimator};
use crate::services::scoring::{self, PolicyConfig};
use crate::services::snapshot::ReferenceData;
use crate::services::telemetry::TelemetryEmitter;
use crate::services::user_context::UserContextFetcher;
use crate::services::{budget, features, ranking};

/// Per-request ranking pipeline
///
/// user context → features → budget filter → CVR/CTR → policy → score → rank → telemetry
pub struct AdRecommender {
    reference: ReferenceData,
    user_context: UserContextFetcher,
    estimator: Estimator,
    telemetry: TelemetryEmitter,
    policy: PolicyConfig,
}

impl AdRecommender {
    pub fn new(
        reference: ReferenceData,
        user_context: UserContextFetcher,
        estimator: Estimator,
        telemetry: TelemetryEmitter,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            reference,
            user_context,
            estimator,
            telemetry,
            policy,
        }
    }

    pub async fn recommend(&self, request: &AdRequest) -> Result<Vec<ScoredCandidate>, RecError> {
        let mut rng = StdRng::from_entropy();
        self.recommend_with_rng(request, &mut rng).await
    }

    /// Same pipeline with caller-supplied randomness.
    pub async fn recommend_with_rng<R>(
        &self,
        request: &AdRequest,
        rng: &mut R,
    ) -> Result<Vec<ScoredCandidate>, RecError>
    where
        R: Rng + Send + ?Sized,
    {
        let _timer = StageTimer::start("recommend");

        let result = self.run(request, rng).await;
        match &result {
            Ok(ranked) => {
                metrics::record_request("ok");
                info!(
                    request_id = %request.request_id,
                    candidates = request.creative_count(),
                    returned = ranked.len(),
                    "Ranked ads"
                );
            }
            Err(e) => {
                metrics::record_request("error");
                error!(request_id = %request.request_id, error = %e, "Ranking failed");
            }
        }
        result
    }

    async fn run<R>(&self, request: &AdRequest, rng: &mut R) -> Result<Vec<ScoredCandidate>, RecError>
    where
        R: Rng + Send + ?Sized,
    {
        let reference = self.reference.snapshot();
        let user = self.user_context.fetch(&request.user_id).await;

        let now = Utc::now();
        let records = features::assemble(request, &user, &reference, now.timestamp_millis());
        let records = budget::filter_over_cap(records);

        let cvr = self.estimator.cvr(&records);
        let ctr = self
            .estimator
            .ctr(CtrStrategy::for_request(request), &records)
            .await?;

        let decision = self.policy.decide(rng);
        metrics::record_experiment_decision(decision.as_str());

        let (scored, mut telemetry) = scoring::score_candidates(
            request,
            &records,
            &ctr,
            &cvr,
            decision,
            &self.policy,
            rng,
        )?;

        let ranked = ranking::rank_for_decision(
            scored,
            request.contexts.ad_count as usize,
            decision,
            &mut telemetry,
            now.timestamp(),
            rng,
        );

        self.telemetry
            .dispatch(&request.request_id, &ranked, telemetry);

        Ok(ranked)
    }
}
