use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;

use crate::store::StoreError;
use crate::users::UserServiceError;

#[derive(Debug, thiserror::Error)]
pub enum AuthServerError {
    #[error("{0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("Token store error: {0}")]
    Store(#[from] StoreError),

    #[error("User service error: {0}")]
    UserService(#[from] UserServiceError),

    #[error("Token signing error: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl AuthServerError {
    /// Message sent to the client. Server-side failures never leak details.
    fn public_message(&self) -> String {
        match self {
            AuthServerError::Validation(message) => message.clone(),
            AuthServerError::Unauthorized => "unauthorized".to_string(),
            _ => "internal server error".to_string(),
        }
    }
}

impl ResponseError for AuthServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthServerError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthServerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthServerError::UserService(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthServerError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed ({}): {}", status, self);
        } else {
            log::warn!("Request rejected ({}): {}", status, self);
        }

        let error_response = ErrorResponse {
            error: self.public_message(),
        };

        HttpResponse::build(status).json(error_response)
    }
}

pub type Result<T> = std::result::Result<T, AuthServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AuthServerError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthServerError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthServerError::Signing("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_stay_private() {
        let err = AuthServerError::Internal("redis at 10.0.0.3 refused".into());
        assert_eq!(err.public_message(), "internal server error");
        assert_eq!(AuthServerError::Unauthorized.public_message(), "unauthorized");
    }
}
