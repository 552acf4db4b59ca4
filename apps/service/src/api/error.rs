use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::orchestrator::TriggerError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Check already in progress")]
    Conflict,
    #[error("{0:#}")]
    RunFailed(anyhow::Error),
}

impl From<TriggerError> for ApiError {
    fn from(error: TriggerError) -> Self {
        match error {
            TriggerError::Conflict => ApiError::Conflict,
            TriggerError::Failed(inner) => ApiError::RunFailed(inner),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::RunFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "detail": self.to_string() }))
    }
}
