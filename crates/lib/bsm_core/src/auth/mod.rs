//! Authentication and authorization logic.
//!
//! Provides password hashing, JWT management, the revocation list, and the
//! credential store abstraction shared by `bsm_api` and the server binary.

pub mod jwt;
pub mod memory;
pub mod opaque;
pub mod password;
pub mod queries;
pub mod revocation;
pub mod store;

use thiserror::Error;

/// Authentication errors.
///
/// The display strings are the messages returned to callers, so they never
/// distinguish an unknown account from a wrong password.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("authentication required")]
    MissingToken,

    #[error("token revoked")]
    TokenRevoked,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("invalid token format")]
    MalformedToken,

    #[error("user not found")]
    UnknownSubject,

    #[error("account not active")]
    AccountInactive,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("invalid or expired reset token")]
    InvalidResetToken,

    #[error("database error during authentication")]
    SessionStore(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
