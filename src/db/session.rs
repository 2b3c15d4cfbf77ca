//! Login sessions, one row per device/browser.
//!
//! Rows store SHA-256 fingerprints of the current token pair, never the
//! tokens. Sessions are deactivated, not deleted, so the table doubles as
//! an audit trail.

use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::{StoreError, db_time};

/// One-way fingerprint of a token, as stored in the sessions table.
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// A persisted login session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub session_token_hash: String,
    pub refresh_token_hash: String,
    pub expires_at: i64,
    pub last_activity: i64,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    session_token_hash: String,
    refresh_token_hash: String,
    expires_at: i64,
    last_activity: i64,
    ip_address: Option<String>,
    user_agent: Option<String>,
    is_active: i64,
    created_at: i64,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            session_token_hash: row.session_token_hash,
            refresh_token_hash: row.refresh_token_hash,
            expires_at: row.expires_at,
            last_activity: row.last_activity,
            client_ip: row.ip_address,
            user_agent: row.user_agent,
            is_active: row.is_active != 0,
            created_at: row.created_at,
        }
    }
}

/// Input for [`SessionStore::create`].
#[derive(Debug, Clone, Copy)]
pub struct NewSession<'a> {
    pub user_id: &'a str,
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    /// Usually the refresh token's `exp`.
    pub expires_at: u64,
    pub client_ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

macro_rules! session_columns {
    () => {
        "id, user_id, session_token_hash, refresh_token_hash, expires_at, \
         last_activity, ip_address, user_agent, is_active, created_at"
    };
}

/// Session queries bound to one connection (usually a transaction).
pub struct SessionStore<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SessionStore<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Insert a new active session for the given token pair.
    pub async fn create(&mut self, new: &NewSession<'_>, now: u64) -> Result<Session, StoreError> {
        let id = Uuid::new_v4().to_string();

        let row: SessionRow = sqlx::query_as(concat!(
            "INSERT INTO sessions (id, user_id, session_token_hash, refresh_token_hash, expires_at,
                                   last_activity, ip_address, user_agent, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
             RETURNING ",
            session_columns!()
        ))
        .bind(&id)
        .bind(new.user_id)
        .bind(fingerprint(new.access_token))
        .bind(fingerprint(new.refresh_token))
        .bind(db_time(new.expires_at))
        .bind(db_time(now))
        .bind(new.client_ip)
        .bind(new.user_agent)
        .bind(db_time(now))
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(row.into())
    }

    /// Find the active, unexpired session bound to `token` (access or refresh).
    /// Deactivated sessions are invisible here.
    pub async fn find_active_by_token(
        &mut self,
        token: &str,
        now: u64,
    ) -> Result<Option<Session>, StoreError> {
        let hash = fingerprint(token);

        let row: Option<SessionRow> = sqlx::query_as(concat!(
            "SELECT ",
            session_columns!(),
            " FROM sessions
             WHERE (session_token_hash = ?1 OR refresh_token_hash = ?1)
               AND is_active = 1 AND expires_at > ?2"
        ))
        .bind(&hash)
        .bind(db_time(now))
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(row.map(Session::from))
    }

    /// Get a session by id regardless of its state.
    pub async fn get(&mut self, id: &str) -> Result<Option<Session>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            "SELECT ",
            session_columns!(),
            " FROM sessions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(row.map(Session::from))
    }

    /// Update `last_activity` of an active session.
    pub async fn touch(&mut self, id: &str, now: u64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE sessions SET last_activity = ? WHERE id = ? AND is_active = 1")
                .bind(db_time(now))
                .bind(id)
                .execute(&mut *self.conn)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Point an active session at a new token pair.
    pub async fn replace_tokens(
        &mut self,
        id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: u64,
        now: u64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET session_token_hash = ?, refresh_token_hash = ?, expires_at = ?, last_activity = ?
             WHERE id = ? AND is_active = 1",
        )
        .bind(fingerprint(access_token))
        .bind(fingerprint(refresh_token))
        .bind(db_time(expires_at))
        .bind(db_time(now))
        .bind(id)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn deactivate(&mut self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE sessions SET is_active = 0 WHERE id = ? AND is_active = 1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate every active session of a user (logout everywhere).
    pub async fn deactivate_all_for_user(&mut self, user_id: &str) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = 0 WHERE user_id = ? AND is_active = 1")
                .bind(user_id)
                .execute(&mut *self.conn)
                .await?;
        Ok(result.rows_affected())
    }

    /// Deactivate sessions whose `expires_at` is before `now`.
    pub async fn deactivate_expired(&mut self, now: u64) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = 0 WHERE is_active = 1 AND expires_at < ?")
                .bind(db_time(now))
                .execute(&mut *self.conn)
                .await?;
        Ok(result.rows_affected())
    }

    /// Active, unexpired sessions of a user, newest first.
    pub async fn list_active_for_user(
        &mut self,
        user_id: &str,
        now: u64,
    ) -> Result<Vec<Session>, StoreError> {
        let rows: Vec<SessionRow> = sqlx::query_as(concat!(
            "SELECT ",
            session_columns!(),
            " FROM sessions
             WHERE user_id = ? AND is_active = 1 AND expires_at > ?
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(user_id)
        .bind(db_time(now))
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    pub async fn count_active_for_user(&mut self, user_id: &str) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = ? AND is_active = 1")
                .bind(user_id)
                .fetch_one(&mut *self.conn)
                .await?;
        Ok(count)
    }
}
