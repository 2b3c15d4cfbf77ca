//! Revoked refresh tokens, keyed by `jti`.
//!
//! Only refresh tokens are ever denylisted. Entries are swept once
//! `expires_at` has passed, at which point the token itself no longer
//! decodes.

use sqlx::SqliteConnection;

use super::{StoreError, db_time};

/// Why a refresh token was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// Replaced by a newer pair.
    Rotation,
    /// User logged out of this session.
    Logout,
    /// Revoked by an operator.
    Manual,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Rotation => "rotation",
            RevocationReason::Logout => "logout",
            RevocationReason::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rotation" => Some(RevocationReason::Rotation),
            "logout" => Some(RevocationReason::Logout),
            "manual" => Some(RevocationReason::Manual),
            _ => None,
        }
    }
}

/// A denylisted refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenylistEntry {
    pub jti: String,
    pub user_id: String,
    pub expires_at: i64,
    pub denylisted_at: i64,
    pub reason: RevocationReason,
}

#[derive(sqlx::FromRow)]
struct DenylistRow {
    jti: String,
    user_id: String,
    expires_at: i64,
    denylisted_at: i64,
    reason: String,
}

impl From<DenylistRow> for DenylistEntry {
    fn from(row: DenylistRow) -> Self {
        Self {
            jti: row.jti,
            user_id: row.user_id,
            expires_at: row.expires_at,
            denylisted_at: row.denylisted_at,
            // Rows are only ever written through `add`.
            reason: RevocationReason::parse(&row.reason).unwrap_or(RevocationReason::Manual),
        }
    }
}

/// Denylist queries bound to one connection (usually a transaction).
pub struct DenylistStore<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> DenylistStore<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Denylist `jti`. Returns `false` when it was already denylisted,
    /// which is not an error.
    pub async fn add(
        &mut self,
        jti: &str,
        user_id: &str,
        expires_at: u64,
        denylisted_at: u64,
        reason: RevocationReason,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO token_denylist (jti, user_id, expires_at, denylisted_at, reason)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (jti) DO NOTHING",
        )
        .bind(jti)
        .bind(user_id)
        .bind(db_time(expires_at))
        .bind(db_time(denylisted_at))
        .bind(reason.as_str())
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn is_denylisted(&mut self, jti: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM token_denylist WHERE jti = ?")
            .bind(jti)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(found.is_some())
    }

    pub async fn get(&mut self, jti: &str) -> Result<Option<DenylistEntry>, StoreError> {
        let row: Option<DenylistRow> = sqlx::query_as(
            "SELECT jti, user_id, expires_at, denylisted_at, reason FROM token_denylist WHERE jti = ?",
        )
        .bind(jti)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(row.map(DenylistEntry::from))
    }

    /// Count entries, optionally for a single user.
    pub async fn count(&mut self, user_id: Option<&str>) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM token_denylist WHERE ?1 IS NULL OR user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(count)
    }

    /// Delete every entry whose `expires_at` is before `now`.
    pub async fn delete_expired(&mut self, now: u64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM token_denylist WHERE expires_at < ?")
            .bind(db_time(now))
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected())
    }
}
