//! HTTP mapping for [`AppError`]

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::api::dto::ErrorResponse;
use crate::errors::{AppError, ErrorKind};

const STORE_UNAVAILABLE_MESSAGE: &str = "The service is temporarily unavailable, please try again";
const INTERNAL_MESSAGE: &str = "Something went wrong while processing the request";

/// API result type
pub type ApiResult<T> = Result<T, AppError>;

pub fn status_for(error: &AppError) -> StatusCode {
    match error.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::TransientStore => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        // store failures are logged in full but never echoed to the client
        let message = match &self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::DuplicateNonRepeatable(msg)
            | AppError::AlreadyApproved(msg)
            | AppError::SelfApprovalForbidden(msg)
            | AppError::ChallengeUnavailable(msg) => msg.clone(),
            AppError::TransientStore(detail) => {
                tracing::error!(error = %detail, "transient store failure");
                STORE_UNAVAILABLE_MESSAGE.to_string()
            }
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "internal failure");
                INTERNAL_MESSAGE.to_string()
            }
        };

        let body = ErrorResponse {
            error: message,
            code: self.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Malformed or mistyped request bodies surface as validation errors with the decoder's message
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}
