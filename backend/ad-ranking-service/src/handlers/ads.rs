use actix_web::{web, HttpResponse};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{AdRequest, ScoredCandidate};
use crate::services::AdRecommender;

/// Upper bound on creatives accepted in one request
pub const MAX_CREATIVES: usize = 2000;

#[derive(Debug, Serialize)]
pub struct RankResponse {
    pub request_id: String,
    pub ads: Vec<ScoredCandidate>,
}

/// Rank the request's candidate creatives
///
/// POST /api/v1/ads/rank
pub async fn rank_ads(
    recommender: web::Data<Arc<AdRecommender>>,
    body: web::Json<AdRequest>,
) -> Result<HttpResponse> {
    let mut request = body.into_inner();

    let creatives = request.creative_count();
    if creatives > MAX_CREATIVES {
        return Err(AppError::Validation(format!(
            "{} creatives exceeds the limit of {}",
            creatives, MAX_CREATIVES
        )));
    }
    if request.request_id.trim().is_empty() {
        request.request_id = Uuid::new_v4().to_string();
    }

    let ads = recommender.recommend(&request).await?;

    Ok(HttpResponse::Ok().json(RankResponse {
        request_id: request.request_id,
        ads,
    }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api/v1/ads").route("/rank", web::post().to(rank_ads)));
}
