//! End-to-end tests for registration, login and logout.
//!
//! Tests cover:
//! - Full register/login/authenticate/rotate/logout flow
//! - Duplicate registration
//! - Login failures that do not reveal which part was wrong
//! - Token kind checks on each flow
//! - Cleanup over the auth core
//! - Argon2 hashing through the real hasher

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{TEST_PASSWORD, TestContext, client, test_config};
use worklog::auth::{Argon2Hasher, AuthCore, AuthError};
use worklog::cleanup::run_cleanup;
use worklog::db::{RevocationReason, Stores};
use worklog::jwt::TokenKind;

#[tokio::test]
async fn test_full_flow() {
    let ctx = TestContext::new().await;

    let registered = ctx.register("alice@example.com").await;
    let user_id = registered.user.id.clone();

    // Access tokens carry no jti, so two sessions opened in the same second
    // would share an access token.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let login = ctx
        .auth
        .login("alice@example.com", TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert_eq!(login.user.id, user_id);
    assert_ne!(login.session.id, registered.session.id);

    // Protected call with the access token.
    let caller = ctx
        .auth
        .authenticate(&login.tokens.access_token)
        .await
        .unwrap();
    assert_eq!(caller.user_id, user_id);
    assert_eq!(caller.claims.kind, TokenKind::Access);

    let rotated = ctx
        .auth
        .rotate_refresh_token(&login.tokens.refresh_token)
        .await
        .unwrap();
    let err = ctx
        .auth
        .validate_token(&login.tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Denylisted));

    let caller = ctx
        .auth
        .authenticate(&rotated.access_token)
        .await
        .unwrap();
    assert_eq!(caller.session_id, login.session.id);

    ctx.auth.logout(&rotated.refresh_token).await.unwrap();

    // The access token still decodes, but its session is gone.
    assert!(ctx.auth.codec().decode(&rotated.access_token).is_ok());
    assert!(ctx.auth.validate_token(&rotated.access_token).await.is_ok());
    let err = ctx
        .auth
        .authenticate(&rotated.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SessionNotFound));

    let err = ctx
        .auth
        .validate_token(&rotated.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Denylisted));

    let jti = ctx
        .auth
        .codec()
        .decode(&rotated.refresh_token)
        .unwrap()
        .jti
        .unwrap();
    let entry = ctx
        .db
        .read(move |conn| Box::pin(async move { conn.denylist().get(&jti).await }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.reason, RevocationReason::Logout);

    // The registration session is untouched.
    let sessions = ctx.auth.list_sessions(&user_id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, registered.session.id);
}

#[tokio::test]
async fn test_duplicate_email_rejected() {
    let ctx = TestContext::new().await;
    ctx.register("alice@example.com").await;

    for email in ["alice@example.com", "  Alice@Example.com "] {
        let err = ctx
            .auth
            .register(email, "another-password", &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken), "{:?}", email);
        assert_eq!(err.error_code(), "EMAIL_TAKEN");
    }
}

#[tokio::test]
async fn test_login_failures_look_the_same() {
    let ctx = TestContext::new().await;
    ctx.register("alice@example.com").await;

    let wrong_password = ctx
        .auth
        .login("alice@example.com", "not-the-password", &client())
        .await
        .unwrap_err();
    let unknown_user = ctx
        .auth
        .login("nobody@example.com", TEST_PASSWORD, &client())
        .await
        .unwrap_err();

    assert!(matches!(wrong_password, AuthError::InvalidCredentials));
    assert!(matches!(unknown_user, AuthError::InvalidCredentials));
    assert_eq!(wrong_password.public_message(), unknown_user.public_message());
}

#[tokio::test]
async fn test_login_is_case_insensitive() {
    let ctx = TestContext::new().await;
    let registered = ctx.register("alice@example.com").await;

    let login = ctx
        .auth
        .login("ALICE@example.com", TEST_PASSWORD, &client())
        .await
        .unwrap();
    assert_eq!(login.user.id, registered.user.id);
}

#[tokio::test]
async fn test_flows_check_token_kind() {
    let ctx = TestContext::new().await;
    let outcome = ctx.register("alice@example.com").await;

    let err = ctx
        .auth
        .authenticate(&outcome.tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::WrongTokenKind {
            expected: TokenKind::Access
        }
    ));

    let err = ctx
        .auth
        .logout(&outcome.tokens.access_token)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::WrongTokenKind {
            expected: TokenKind::Refresh
        }
    ));
}

#[tokio::test]
async fn test_get_user() {
    let ctx = TestContext::new().await;
    let outcome = ctx.register("alice@example.com").await;

    let user = ctx.auth.get_user(&outcome.user.id).await.unwrap();
    assert_eq!(user.email, "alice@example.com");
    // The stored hash never shows up in logs.
    assert!(!format!("{:?}", user).contains("plain:"));

    let err = ctx.auth.get_user("missing").await.unwrap_err();
    assert!(matches!(err, AuthError::UserNotFound));
}

#[tokio::test]
async fn test_run_cleanup() {
    let ctx = TestContext::new().await;
    let outcome = ctx.register("alice@example.com").await;
    ctx.auth
        .denylist_refresh_token("manual-jti", &outcome.user.id, RevocationReason::Manual)
        .await
        .unwrap();

    // Nothing has expired yet; cleanup must not touch live rows.
    run_cleanup(&ctx.auth).await;

    assert!(ctx.auth.is_denylisted("manual-jti").await.unwrap());
    assert_eq!(ctx.auth.active_session_count(&outcome.user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_register_and_login_with_argon2() {
    let ctx = TestContext::new().await;
    let hasher = Argon2Hasher::with_params(8, 1, 1).unwrap();
    let auth = AuthCore::with_hasher(ctx.db.clone(), test_config(), Arc::new(hasher));

    let registered = auth
        .register("carol@example.com", "s3cret-pass", &client())
        .await
        .unwrap();
    assert!(registered.user.password_hash.starts_with("$argon2id$"));

    assert!(
        auth.login("carol@example.com", "s3cret-pass", &client())
            .await
            .is_ok()
    );
    let err = auth
        .login("carol@example.com", "wrong", &client())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
}
