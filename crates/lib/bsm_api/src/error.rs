//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bsm_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            success: false,
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials
            | AuthError::MissingToken
            | AuthError::TokenRevoked
            | AuthError::InvalidToken
            | AuthError::MalformedToken
            | AuthError::UnknownSubject
            | AuthError::InvalidRefreshToken
            | AuthError::SessionStore(_) => AppError::Unauthorized(e.to_string()),
            AuthError::AccountInactive | AuthError::InsufficientPermissions => {
                AppError::Forbidden(e.to_string())
            }
            AuthError::InvalidResetToken => AppError::Validation(e.to_string()),
            AuthError::ValidationError(msg) => AppError::Validation(msg),
            AuthError::DbError(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: AuthError) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn auth_errors_map_to_taxonomy() {
        assert_eq!(status_of(AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(AuthError::MissingToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(AuthError::TokenRevoked), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(AuthError::UnknownSubject), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(AuthError::SessionStore("down".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(AuthError::AccountInactive), StatusCode::FORBIDDEN);
        assert_eq!(status_of(AuthError::InsufficientPermissions), StatusCode::FORBIDDEN);
        assert_eq!(status_of(AuthError::InvalidResetToken), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(AuthError::ValidationError("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AuthError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(AuthError::DbError(sqlx::Error::RowNotFound)),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn unauthorized_message_is_the_auth_message() {
        match AppError::from(AuthError::InvalidCredentials) {
            AppError::Unauthorized(m) => assert_eq!(m, "invalid email or password"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
