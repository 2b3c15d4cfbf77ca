#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use worklog::auth::{AuthCore, ClientInfo, CredentialHasher, LoginOutcome, PasswordError};
use worklog::config::AuthConfig;
use worklog::db::{Database, DatabaseOptions};

pub const TEST_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";
pub const TEST_PASSWORD: &str = "password123";

/// Stores passwords with a marker prefix so tests skip argon2.
pub struct PlainHasher;

impl CredentialHasher for PlainHasher {
    fn hash(&self, password: &str) -> Result<String, PasswordError> {
        Ok(format!("plain:{}", password))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        match hash.strip_prefix("plain:") {
            Some(stored) => Ok(stored == password),
            None => Err(PasswordError::InvalidHash(hash.to_string())),
        }
    }
}

/// A database in a temp dir plus an auth core on top of it.
/// The directory is removed when the context is dropped.
pub struct TestContext {
    pub dir: TempDir,
    pub db: Database,
    pub auth: AuthCore,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_options(test_config(), |options| options).await
    }

    pub async fn with_options(
        config: AuthConfig,
        customize: impl FnOnce(DatabaseOptions) -> DatabaseOptions,
    ) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let options = customize(DatabaseOptions::new(dir.path().join("test.db")));
        let db = Database::open(&options)
            .await
            .expect("Failed to open test database");
        let auth = AuthCore::with_hasher(db.clone(), config, Arc::new(PlainHasher));
        Self { dir, db, auth }
    }

    /// A second auth core sharing this database but with its own config.
    pub fn auth_with(&self, config: AuthConfig) -> AuthCore {
        AuthCore::with_hasher(self.db.clone(), config, Arc::new(PlainHasher))
    }

    pub async fn register(&self, email: &str) -> LoginOutcome {
        self.auth
            .register(email, TEST_PASSWORD, &client())
            .await
            .expect("Failed to register user")
    }
}

pub fn test_config() -> AuthConfig {
    AuthConfig::new(TEST_SECRET.to_vec()).expect("Test secret is long enough")
}

pub fn client() -> ClientInfo {
    ClientInfo::new("127.0.0.1", "test-agent/1.0")
}
