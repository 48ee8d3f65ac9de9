//! Mapping of engine errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::ErrorResponse;
use tracing::warn;

use crate::errors::DeployError;

/// A [`DeployError`] on its way out of a handler
#[derive(Debug)]
pub struct ApiError(pub DeployError);

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DeployError::NotFound(_) => StatusCode::NOT_FOUND,
            DeployError::Conflict(_) | DeployError::Cancelled(_) => StatusCode::CONFLICT,
            DeployError::ValidationError(_) | DeployError::JsonError(_) => StatusCode::BAD_REQUEST,
            DeployError::AuthError(_)
            | DeployError::TransportError(_)
            | DeployError::SyncError(_)
            | DeployError::CommandError { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: DeployError| ApiError(e).status();
        assert_eq!(status(DeployError::NotFound("task".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(DeployError::Conflict("run".into())), StatusCode::CONFLICT);
        assert_eq!(status(DeployError::ValidationError("name".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(DeployError::SyncError("E170013".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status(DeployError::Internal("boom".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
