use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::services::estimator::EstimatorError;

/// Failure of one ranking call. Any of these means "no ranked output".
#[derive(Debug, Error)]
pub enum RecError {
    #[error("CTR unavailable: {0}")]
    Ctr(#[from] EstimatorError),

    #[error("CTR size mismatch: got {ctr}, expected {records} feature records")]
    CtrSizeMismatch { ctr: usize, records: usize },

    #[error("CVR size mismatch: got {cvr}, expected {records} feature records")]
    CvrSizeMismatch { cvr: usize, records: usize },
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Ranking failed: {0}")]
    Ranking(#[from] RecError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Ranking(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),
        }))
    }
}
