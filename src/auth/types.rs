//! Values returned by the auth flows.

use crate::db::{Session, User};
use crate::jwt::{Claims, IssuedToken};

/// A freshly issued access/refresh pair.
#[derive(Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: u64,
    pub refresh_expires_at: u64,
}

impl TokenPair {
    pub(crate) fn new(access: IssuedToken, refresh: IssuedToken) -> Self {
        Self {
            access_expires_at: access.claims.exp,
            refresh_expires_at: refresh.claims.exp,
            access_token: access.token,
            refresh_token: refresh.token,
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// Where a login came from, recorded on the session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// Result of a successful registration or login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: Session,
    pub tokens: TokenPair,
}

/// Caller identity established from an access token and its live session.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Claims from the access token
    pub claims: Claims,
    pub user_id: String,
    pub session_id: String,
}
