//! Runtime configuration for the auth core.

use std::time::Duration;

use thiserror::Error;

use crate::jwt::DEFAULT_ISSUER;

/// Minimum length of the signing secret, in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("JWT secret must be at least {minimum} bytes (got {actual})")]
    SecretTooShort { actual: usize, minimum: usize },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Secret and lifetimes, fixed for the lifetime of an `AuthCore`.
#[derive(Clone)]
pub struct AuthConfig {
    secret: Vec<u8>,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub cleanup_interval: Duration,
}

impl AuthConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::SecretTooShort {
                actual: secret.len(),
                minimum: MIN_SECRET_LENGTH,
            });
        }

        Ok(Self {
            secret,
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl: ACCESS_TOKEN_TTL,
            refresh_ttl: REFRESH_TOKEN_TTL,
            cleanup_interval: CLEANUP_INTERVAL,
        })
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_access_ttl(mut self, ttl: Duration) -> Result<Self, ConfigError> {
        self.access_ttl = non_zero(ttl, "access token TTL")?;
        Ok(self)
    }

    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Result<Self, ConfigError> {
        self.refresh_ttl = non_zero(ttl, "refresh token TTL")?;
        Ok(self)
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        self.cleanup_interval = non_zero(interval, "cleanup interval")?;
        Ok(self)
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

fn non_zero(value: Duration, what: &'static str) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        Err(ConfigError::ZeroDuration(what))
    } else {
        Ok(value)
    }
}
