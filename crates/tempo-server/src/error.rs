//! Maps every fallible HTTP handler's error into a response, the same
//! problem-details shape the teacher stack's `control::error::AppError`
//! uses, generalized across the ingress, query, and index error enums
//! instead of a single database-backed service's.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    title: String,
    detail: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("ingress error")]
    Ingress(#[from] tempo_ingress::Error),
    #[error("query error")]
    Query(#[from] tempo_query::Error),
    #[error("tenant index error")]
    Index(#[from] tempo_index::Error),
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Ingress(tempo_ingress::Error::Malformed(_)) => StatusCode::BAD_REQUEST,
            AppError::Ingress(tempo_ingress::Error::Unauthenticated) => StatusCode::UNAUTHORIZED,
            AppError::Ingress(tempo_ingress::Error::RateLimited { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::Ingress(tempo_ingress::Error::Unavailable) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Ingress(tempo_ingress::Error::Internal(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Query(tempo_query::Error::PartialResult) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Index(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        }

        let body = Json(ProblemDetails {
            title: self.to_string(),
            detail: None,
        });
        (status, body).into_response()
    }
}
