use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::audit::invoker::InvokeError;
use crate::audit::orchestrator::OrchestrationError;
use crate::audit::PageValidationError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] PageValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Orchestration(e) => match e {
                OrchestrationError::NoMatchingPages | OrchestrationError::PageNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                OrchestrationError::Invoke(InvokeError::UnsupportedDevice(_)) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                OrchestrationError::Invoke(InvokeError::Timeout { .. }) => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                OrchestrationError::Invoke(_) | OrchestrationError::Parse(_) => {
                    StatusCode::BAD_GATEWAY
                }
                OrchestrationError::PersistFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                OrchestrationError::Store(_) | OrchestrationError::Cancelled => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            ApiError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(StoreError::Encoding(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
