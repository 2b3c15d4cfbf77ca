use sqlx::SqliteConnection;
use uuid::Uuid;

use super::{StoreError, db_time};

#[derive(Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: i64,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    created_at: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            created_at: row.created_at,
        }
    }
}

pub struct UserStore<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> UserStore<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Create a user with a fresh UUID. Fails with a unique violation if the
    /// email (case-insensitive) is taken.
    pub async fn create(
        &mut self,
        email: &str,
        password_hash: &str,
        now: u64,
    ) -> Result<User, StoreError> {
        let id = Uuid::new_v4().to_string();

        let row: UserRow = sqlx::query_as(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)
             RETURNING id, email, password_hash, created_at",
        )
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(db_time(now))
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(row.into())
    }

    pub async fn get_by_id(&mut self, id: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, email, password_hash, created_at FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *self.conn)
                .await?;
        Ok(row.map(User::from))
    }

    pub async fn get_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(row.map(User::from))
    }

    pub async fn is_email_available(&mut self, email: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(found.is_none())
    }
}
