//! Token lifecycle and sessions on top of the transactional store.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqliteConnection;
use tracing::{debug, error, info, warn};

use super::errors::AuthError;
use super::password::{Argon2Hasher, CredentialHasher};
use super::types::{AuthenticatedUser, ClientInfo, LoginOutcome, TokenPair};
use crate::config::AuthConfig;
use crate::db::{Database, NewSession, RevocationReason, Session, StoreError, Stores, User};
use crate::jwt::{Claims, IssuedToken, TokenCodec, TokenError, TokenKind, unix_now};

/// Mints tokens with the configured lifetimes. Cheap to clone into a
/// transaction closure.
#[derive(Clone)]
struct TokenIssuer {
    codec: Arc<TokenCodec>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    fn access(&self, user_id: &str) -> Result<IssuedToken, AuthError> {
        Ok(self.codec.issue(TokenKind::Access, user_id, self.access_ttl)?)
    }

    fn refresh(&self, user_id: &str) -> Result<IssuedToken, AuthError> {
        Ok(self.codec.issue(TokenKind::Refresh, user_id, self.refresh_ttl)?)
    }

    fn pair(&self, user_id: &str) -> Result<(IssuedToken, IssuedToken), AuthError> {
        Ok((self.access(user_id)?, self.refresh(user_id)?))
    }
}

/// Issues, validates, rotates and revokes tokens, and keeps the session
/// rows in step with them.
///
/// Holds no cached state: every revocation or session check is a fresh
/// read inside a transaction, so any number of clones (or independently
/// configured instances) can serve requests concurrently.
#[derive(Clone)]
pub struct AuthCore {
    db: Database,
    issuer: TokenIssuer,
    config: Arc<AuthConfig>,
    hasher: Arc<dyn CredentialHasher>,
}

impl AuthCore {
    pub fn new(db: Database, config: AuthConfig) -> Self {
        Self::with_hasher(db, config, Arc::new(Argon2Hasher::default()))
    }

    pub fn with_hasher(
        db: Database,
        config: AuthConfig,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        let codec = TokenCodec::with_issuer(config.secret(), &config.issuer);
        let issuer = TokenIssuer {
            codec: Arc::new(codec),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        };

        Self {
            db,
            issuer,
            config: Arc::new(config),
            hasher,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.issuer.codec
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    pub fn issue_access_token(&self, user_id: &str) -> Result<IssuedToken, AuthError> {
        self.issuer.access(user_id)
    }

    /// Every call mints a new `jti`.
    pub fn issue_refresh_token(&self, user_id: &str) -> Result<IssuedToken, AuthError> {
        self.issuer.refresh(user_id)
    }

    /// Decode `token` and, for refresh tokens, check the denylist.
    ///
    /// A failed denylist lookup rejects the token.
    pub async fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.issuer.codec.decode(token).map_err(|e| {
            if matches!(e, TokenError::InvalidSignature) {
                warn!("Rejected token with invalid signature");
            }
            AuthError::from(e)
        })?;

        match claims.kind {
            TokenKind::Access => Ok(claims),
            TokenKind::Refresh => {
                let jti = claims.refresh_id().ok_or(AuthError::Malformed)?.to_string();

                let denylisted = self
                    .db
                    .read(move |conn| {
                        Box::pin(async move { conn.denylist().is_denylisted(&jti).await })
                    })
                    .await
                    .map_err(|e| {
                        error!(error = %e, "Denylist lookup failed, rejecting refresh token");
                        AuthError::from(e)
                    })?;

                if denylisted {
                    debug!(user_id = %claims.sub, "Rejected denylisted refresh token");
                    return Err(AuthError::Denylisted);
                }
                Ok(claims)
            }
        }
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// Denylisting the old `jti`, minting the pair and repointing the session
    /// happen in one write transaction. Of two concurrent rotations of the
    /// same token exactly one succeeds; the other gets `Denylisted`.
    pub async fn rotate_refresh_token(
        &self,
        old_refresh_token: &str,
    ) -> Result<TokenPair, AuthError> {
        let claims = self.validate_token(old_refresh_token).await?;
        let jti = match claims.kind {
            TokenKind::Refresh => claims.refresh_id().ok_or(AuthError::Malformed)?.to_string(),
            TokenKind::Access => {
                return Err(AuthError::WrongTokenKind {
                    expected: TokenKind::Refresh,
                });
            }
        };

        let issuer = self.issuer.clone();
        let old_token = old_refresh_token.to_string();
        let user_id = claims.sub.clone();
        let old_exp = claims.exp;

        let (session_id, tokens) = self
            .db
            .write(move |conn| {
                let issuer = issuer.clone();
                let old_token = old_token.clone();
                let jti = jti.clone();
                let user_id = user_id.clone();

                Box::pin(async move {
                    let now = unix_now();

                    // A concurrent rotation of the same token queues on the
                    // write lock and then sees this row.
                    let inserted = conn
                        .denylist()
                        .add(&jti, &user_id, old_exp, now, RevocationReason::Rotation)
                        .await?;
                    if !inserted {
                        return Err(AuthError::Denylisted);
                    }

                    let session = conn
                        .sessions()
                        .find_active_by_token(&old_token, now)
                        .await?
                        .filter(|s| s.user_id == user_id)
                        .ok_or(AuthError::SessionNotFound)?;

                    let (access, refresh) = issuer.pair(&user_id)?;
                    let replaced = conn
                        .sessions()
                        .replace_tokens(
                            &session.id,
                            &access.token,
                            &refresh.token,
                            refresh.claims.exp,
                            now,
                        )
                        .await?;
                    if !replaced {
                        return Err(AuthError::SessionNotFound);
                    }

                    Ok::<_, AuthError>((session.id, TokenPair::new(access, refresh)))
                })
            })
            .await?;

        info!(user_id = %claims.sub, session_id = %session_id, "Rotated refresh token");
        Ok(tokens)
    }

    /// Revoke a refresh token by `jti`. Revoking twice is not an error;
    /// returns whether this call added the entry.
    ///
    /// The token's real expiry is unknown here, so the entry is kept for a
    /// full refresh lifetime.
    pub async fn denylist_refresh_token(
        &self,
        jti: &str,
        user_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, AuthError> {
        let jti = jti.to_string();
        let user_id = user_id.to_string();
        let expires_at = unix_now().saturating_add(self.config.refresh_ttl.as_secs());

        let added = self
            .db
            .write(move |conn| {
                let jti = jti.clone();
                let user_id = user_id.clone();
                Box::pin(async move {
                    conn.denylist()
                        .add(&jti, &user_id, expires_at, unix_now(), reason)
                        .await
                })
            })
            .await?;

        Ok(added)
    }

    pub async fn is_denylisted(&self, jti: &str) -> Result<bool, AuthError> {
        let jti = jti.to_string();
        let found = self
            .db
            .read(move |conn| Box::pin(async move { conn.denylist().is_denylisted(&jti).await }))
            .await?;
        Ok(found)
    }

    /// Drop denylist entries whose token can no longer decode anyway.
    pub async fn cleanup_expired_tokens(&self) -> Result<u64, AuthError> {
        let deleted = self
            .db
            .write(|conn| Box::pin(async move { conn.denylist().delete_expired(unix_now()).await }))
            .await?;
        Ok(deleted)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Record a session for an already issued pair. The session expires
    /// with the refresh token.
    pub async fn create_session(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<Session, AuthError> {
        let expires_at = self.issuer.codec.decode(refresh_token)?.exp;

        let user_id = user_id.to_string();
        let access_token = access_token.to_string();
        let refresh_token = refresh_token.to_string();
        let client = client.clone();

        let session = self
            .db
            .write(move |conn| {
                let user_id = user_id.clone();
                let access_token = access_token.clone();
                let refresh_token = refresh_token.clone();
                let client = client.clone();

                Box::pin(async move {
                    let new = NewSession {
                        user_id: &user_id,
                        access_token: &access_token,
                        refresh_token: &refresh_token,
                        expires_at,
                        client_ip: client.ip.as_deref(),
                        user_agent: client.user_agent.as_deref(),
                    };
                    conn.sessions().create(&new, unix_now()).await
                })
            })
            .await?;

        Ok(session)
    }

    /// The active session bound to `token`, or `SessionNotFound`.
    pub async fn find_session(&self, token: &str) -> Result<Session, AuthError> {
        let token = token.to_string();
        let session = self
            .db
            .read(move |conn| {
                Box::pin(async move {
                    conn.sessions()
                        .find_active_by_token(&token, unix_now())
                        .await
                })
            })
            .await?;

        session.ok_or(AuthError::SessionNotFound)
    }

    pub async fn touch_session(&self, session_id: &str) -> Result<(), AuthError> {
        let session_id = session_id.to_string();
        let touched = self
            .db
            .write(move |conn| {
                let session_id = session_id.clone();
                Box::pin(async move { conn.sessions().touch(&session_id, unix_now()).await })
            })
            .await?;

        if touched {
            Ok(())
        } else {
            Err(AuthError::SessionNotFound)
        }
    }

    /// Deactivate one session. Returns `false` if it was not active.
    pub async fn deactivate_session(&self, session_id: &str) -> Result<bool, AuthError> {
        let id = session_id.to_string();
        let deactivated = self
            .db
            .write(move |conn| {
                let id = id.clone();
                Box::pin(async move { conn.sessions().deactivate(&id).await })
            })
            .await?;

        if deactivated {
            info!(session_id = %session_id, "Deactivated session");
        }
        Ok(deactivated)
    }

    /// Deactivate every active session of `user_id`. Tokens bound to them
    /// stop authenticating even while they still decode.
    pub async fn logout_everywhere(&self, user_id: &str) -> Result<u64, AuthError> {
        let owner = user_id.to_string();
        let count = self
            .db
            .write(move |conn| {
                let owner = owner.clone();
                Box::pin(async move { conn.sessions().deactivate_all_for_user(&owner).await })
            })
            .await?;

        info!(user_id = %user_id, count, "Deactivated all sessions");
        Ok(count)
    }

    /// Active sessions of `user_id`, newest first.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, AuthError> {
        let user_id = user_id.to_string();
        let sessions = self
            .db
            .read(move |conn| {
                Box::pin(async move {
                    conn.sessions()
                        .list_active_for_user(&user_id, unix_now())
                        .await
                })
            })
            .await?;
        Ok(sessions)
    }

    pub async fn active_session_count(&self, user_id: &str) -> Result<i64, AuthError> {
        let user_id = user_id.to_string();
        let count = self
            .db
            .read(move |conn| {
                Box::pin(async move { conn.sessions().count_active_for_user(&user_id).await })
            })
            .await?;
        Ok(count)
    }

    /// Deactivate sessions whose refresh token has expired.
    pub async fn expire_sessions(&self) -> Result<u64, AuthError> {
        let count = self
            .db
            .write(|conn| {
                Box::pin(async move { conn.sessions().deactivate_expired(unix_now()).await })
            })
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Flows
    // =========================================================================

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let email = email.trim().to_string();
        let password_hash = self.hash_password(password).await?;
        let issuer = self.issuer.clone();
        let client = client.clone();

        let outcome = self
            .db
            .write(move |conn| {
                let email = email.clone();
                let password_hash = password_hash.clone();
                let issuer = issuer.clone();
                let client = client.clone();

                Box::pin(async move {
                    let now = unix_now();

                    if !conn.users().is_email_available(&email).await? {
                        return Err(AuthError::EmailTaken);
                    }
                    let user = conn
                        .users()
                        .create(&email, &password_hash, now)
                        .await
                        .map_err(|e| match e {
                            StoreError::UniqueViolation(_) => AuthError::EmailTaken,
                            e => AuthError::from(e),
                        })?;

                    let (session, tokens) =
                        start_session(conn, &issuer, &user.id, &client, now).await?;
                    Ok::<_, AuthError>(LoginOutcome {
                        user,
                        session,
                        tokens,
                    })
                })
            })
            .await?;

        info!(
            user_id = %outcome.user.id,
            session_id = %outcome.session.id,
            "Registered user"
        );
        Ok(outcome)
    }

    /// Unknown email and wrong password fail the same way.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let lookup = email.trim().to_string();
        let user = self
            .db
            .read(move |conn| Box::pin(async move { conn.users().get_by_email(&lookup).await }))
            .await?;

        let Some(user) = user else {
            debug!("Login attempt for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.verify_password(password, &user.password_hash).await? {
            warn!(user_id = %user.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let issuer = self.issuer.clone();
        let user_id = user.id.clone();
        let client = client.clone();

        let (session, tokens) = self
            .db
            .write(move |conn| {
                let issuer = issuer.clone();
                let user_id = user_id.clone();
                let client = client.clone();
                Box::pin(async move {
                    start_session(conn, &issuer, &user_id, &client, unix_now()).await
                })
            })
            .await?;

        info!(user_id = %user.id, session_id = %session.id, "User logged in");
        Ok(LoginOutcome {
            user,
            session,
            tokens,
        })
    }

    /// Resolve an access token to its user and live session, and record
    /// the activity.
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.validate_token(access_token).await?;
        match claims.kind {
            TokenKind::Access => {}
            TokenKind::Refresh => {
                return Err(AuthError::WrongTokenKind {
                    expected: TokenKind::Access,
                });
            }
        }

        let token = access_token.to_string();
        let subject = claims.sub.clone();

        let session = self
            .db
            .write(move |conn| {
                let token = token.clone();
                let subject = subject.clone();

                Box::pin(async move {
                    let now = unix_now();
                    let session = conn
                        .sessions()
                        .find_active_by_token(&token, now)
                        .await?
                        .filter(|s| s.user_id == subject)
                        .ok_or(AuthError::SessionNotFound)?;
                    conn.sessions().touch(&session.id, now).await?;
                    Ok::<_, AuthError>(session)
                })
            })
            .await?;

        Ok(AuthenticatedUser {
            user_id: claims.sub.clone(),
            session_id: session.id,
            claims,
        })
    }

    /// Revoke a refresh token and end the session it belongs to.
    ///
    /// Fails with [`AuthError::Denylisted`] if the token was already revoked,
    /// including by a rotation that committed first.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self.validate_token(refresh_token).await?;
        let jti = match claims.kind {
            TokenKind::Refresh => claims.refresh_id().ok_or(AuthError::Malformed)?.to_string(),
            TokenKind::Access => {
                return Err(AuthError::WrongTokenKind {
                    expected: TokenKind::Refresh,
                });
            }
        };

        let token = refresh_token.to_string();
        let user_id = claims.sub.clone();
        let exp = claims.exp;

        let session_id = self
            .db
            .write(move |conn| {
                let token = token.clone();
                let jti = jti.clone();
                let user_id = user_id.clone();

                Box::pin(async move {
                    let now = unix_now();
                    // Already revoked, by an earlier logout or by a rotation
                    // that moved the session on to a newer pair.
                    let inserted = conn
                        .denylist()
                        .add(&jti, &user_id, exp, now, RevocationReason::Logout)
                        .await?;
                    if !inserted {
                        return Err(AuthError::Denylisted);
                    }

                    let session = conn.sessions().find_active_by_token(&token, now).await?;
                    if let Some(session) = &session {
                        conn.sessions().deactivate(&session.id).await?;
                    }
                    Ok::<_, AuthError>(session.map(|s| s.id))
                })
            })
            .await?;

        info!(user_id = %claims.sub, session_id = ?session_id, "User logged out");
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User, AuthError> {
        let id = user_id.to_string();
        let user = self
            .db
            .read(move |conn| Box::pin(async move { conn.users().get_by_id(&id).await }))
            .await?;
        user.ok_or(AuthError::UserNotFound)
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();

        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("password hashing task failed: {}", e)))??;
        Ok(hash)
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        let hash = hash.to_string();

        let verified = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("password check task failed: {}", e)))?
            .map_err(|e| {
                error!(error = %e, "Stored password hash is unusable");
                e
            })?;
        Ok(verified)
    }
}

/// Issue a pair for `user_id` and record the session, inside the caller's
/// transaction.
async fn start_session(
    conn: &mut SqliteConnection,
    issuer: &TokenIssuer,
    user_id: &str,
    client: &ClientInfo,
    now: u64,
) -> Result<(Session, TokenPair), AuthError> {
    let (access, refresh) = issuer.pair(user_id)?;

    let new = NewSession {
        user_id,
        access_token: &access.token,
        refresh_token: &refresh.token,
        expires_at: refresh.claims.exp,
        client_ip: client.ip.as_deref(),
        user_agent: client.user_agent.as_deref(),
    };
    let session = conn.sessions().create(&new, now).await?;

    Ok((session, TokenPair::new(access, refresh)))
}
