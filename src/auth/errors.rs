//! Authentication error types.

use thiserror::Error;
use tracing::error;

use super::password::PasswordError;
use crate::db::{StoreError, TxError};
use crate::jwt::{TokenError, TokenKind};

/// Every way an auth operation can fail.
///
/// Token failures keep their distinct variants internally; use
/// [`AuthError::public_message`] for what goes back to a client.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token has been revoked")]
    Denylisted,
    #[error("expected a {} token", .expected.as_str())]
    WrongTokenKind { expected: TokenKind },
    #[error("no active session for token")]
    SessionNotFound,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email is already registered")]
    EmailTaken,
    #[error("user not found")]
    UserNotFound,
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Storage(StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code, distinct for every failure a client
    /// may need to react to differently.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Malformed => "TOKEN_MALFORMED",
            AuthError::InvalidSignature => "TOKEN_INVALID_SIGNATURE",
            AuthError::Expired => "TOKEN_EXPIRED",
            AuthError::NotYetValid => "TOKEN_NOT_YET_VALID",
            AuthError::Denylisted => "TOKEN_REVOKED",
            AuthError::WrongTokenKind { .. } => "WRONG_TOKEN_TYPE",
            AuthError::SessionNotFound => "SESSION_NOT_FOUND",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::EmailTaken => "EMAIL_TAKEN",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::Storage(e) if e.is_serialization_conflict() => "SERIALIZATION_CONFLICT",
            AuthError::Storage(e) if e.is_unavailable() => "STORAGE_UNAVAILABLE",
            AuthError::Storage(_) => "DATABASE_ERROR",
            AuthError::Password(_) | AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-style status a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Malformed
            | AuthError::InvalidSignature
            | AuthError::Expired
            | AuthError::NotYetValid
            | AuthError::Denylisted
            | AuthError::WrongTokenKind { .. }
            | AuthError::SessionNotFound
            | AuthError::InvalidCredentials => 401,
            AuthError::UserNotFound => 404,
            AuthError::EmailTaken => 409,
            AuthError::Storage(e) if e.is_serialization_conflict() || e.is_unavailable() => 503,
            AuthError::Storage(_) | AuthError::Password(_) | AuthError::Internal(_) => 500,
        }
    }

    /// The caller sent something unacceptable; retrying the same request
    /// will fail the same way.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// The failure was transient and the caller may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Storage(e) if e.is_serialization_conflict() || e.is_unavailable())
    }

    /// Message safe to show a client. Token failures collapse into one
    /// message apart from expiry, which tells the client to refresh.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::Malformed
            | AuthError::InvalidSignature
            | AuthError::NotYetValid
            | AuthError::Denylisted
            | AuthError::WrongTokenKind { .. }
            | AuthError::SessionNotFound => "Invalid or revoked token",
            AuthError::Expired => "Token expired",
            AuthError::InvalidCredentials => "Invalid email or password",
            AuthError::EmailTaken => "Email is already registered",
            AuthError::UserNotFound => "User not found",
            AuthError::Storage(_) | AuthError::Password(_) | AuthError::Internal(_) => {
                "Internal server error"
            }
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => AuthError::Malformed,
            TokenError::InvalidSignature => AuthError::InvalidSignature,
            TokenError::Expired => AuthError::Expired,
            TokenError::NotYetValid => AuthError::NotYetValid,
            TokenError::Encoding(e) => {
                error!(error = %e, "Failed to sign token");
                AuthError::Internal(format!("failed to sign token: {}", e))
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Storage(err)
    }
}

impl TxError for AuthError {
    fn is_serialization_conflict(&self) -> bool {
        matches!(self, AuthError::Storage(e) if e.is_serialization_conflict())
    }
}
