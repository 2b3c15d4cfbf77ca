//! Tests for session lifecycle.
//!
//! Tests cover:
//! - Sessions created at registration and login
//! - Lookup by access or refresh token fingerprint
//! - Deactivation of one session and of all sessions of a user
//! - Token replacement only on active sessions
//! - Listing active sessions
//! - Expiry sweep keeping rows for auditing

mod common;

use common::{TestContext, client};
use worklog::auth::{AuthError, ClientInfo};
use worklog::db::{NewSession, StoreError, Stores, fingerprint};
use worklog::jwt::unix_now;

#[tokio::test]
async fn test_registration_creates_session() {
    let ctx = TestContext::new().await;
    let outcome = ctx.register("alice@example.com").await;

    let session = &outcome.session;
    assert_eq!(session.user_id, outcome.user.id);
    assert!(session.is_active);
    assert_eq!(session.client_ip.as_deref(), Some("127.0.0.1"));
    assert_eq!(session.user_agent.as_deref(), Some("test-agent/1.0"));
    assert_eq!(session.expires_at, outcome.tokens.refresh_expires_at as i64);

    // Only fingerprints are stored.
    assert_eq!(
        session.session_token_hash,
        fingerprint(&outcome.tokens.access_token)
    );
    assert_eq!(
        session.refresh_token_hash,
        fingerprint(&outcome.tokens.refresh_token)
    );
}

#[tokio::test]
async fn test_find_session_by_either_token() {
    let ctx = TestContext::new().await;
    let outcome = ctx.register("alice@example.com").await;

    let by_access = ctx
        .auth
        .find_session(&outcome.tokens.access_token)
        .await
        .unwrap();
    let by_refresh = ctx
        .auth
        .find_session(&outcome.tokens.refresh_token)
        .await
        .unwrap();

    assert_eq!(by_access.id, outcome.session.id);
    assert_eq!(by_refresh.id, outcome.session.id);

    let err = ctx.auth.find_session("not-a-token").await.unwrap_err();
    assert!(matches!(err, AuthError::SessionNotFound));
}

#[tokio::test]
async fn test_create_session_for_issued_pair() {
    let ctx = TestContext::new().await;
    let user = ctx.register("alice@example.com").await.user;

    let access = ctx.auth.issue_access_token(&user.id).unwrap();
    let refresh = ctx.auth.issue_refresh_token(&user.id).unwrap();
    let session = ctx
        .auth
        .create_session(&user.id, &access.token, &refresh.token, &ClientInfo::default())
        .await
        .unwrap();

    assert!(session.client_ip.is_none());
    assert_eq!(session.expires_at, refresh.claims.exp as i64);

    let found = ctx.auth.find_session(&refresh.token).await.unwrap();
    assert_eq!(found.id, session.id);
}

#[tokio::test]
async fn test_deactivated_session_is_not_found() {
    let ctx = TestContext::new().await;
    let outcome = ctx.register("alice@example.com").await;

    assert!(ctx.auth.deactivate_session(&outcome.session.id).await.unwrap());
    assert!(!ctx.auth.deactivate_session(&outcome.session.id).await.unwrap());

    let err = ctx
        .auth
        .find_session(&outcome.tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SessionNotFound));

    let err = ctx
        .auth
        .touch_session(&outcome.session.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SessionNotFound));

    let err = ctx
        .auth
        .authenticate(&outcome.tokens.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SessionNotFound));
    assert!(err.is_client_error());

    // The row stays behind, inactive.
    let id = outcome.session.id.clone();
    let row = ctx
        .db
        .read(move |conn| Box::pin(async move { conn.sessions().get(&id).await }))
        .await
        .unwrap()
        .unwrap();
    assert!(!row.is_active);
}

#[tokio::test]
async fn test_touch_updates_last_activity() {
    let ctx = TestContext::new().await;
    let outcome = ctx.register("alice@example.com").await;
    let id = outcome.session.id.clone();
    let later = unix_now() + 120;

    let touched = ctx
        .db
        .write(move |conn| {
            let id = id.clone();
            Box::pin(async move {
                let touched = conn.sessions().touch(&id, later).await?;
                let session = conn.sessions().get(&id).await?;
                Ok::<_, StoreError>((touched, session))
            })
        })
        .await
        .unwrap();

    assert!(touched.0);
    assert_eq!(touched.1.unwrap().last_activity, later as i64);
    ctx.auth.touch_session(&outcome.session.id).await.unwrap();
}

#[tokio::test]
async fn test_replace_tokens_skips_inactive_session() {
    let ctx = TestContext::new().await;
    let outcome = ctx.register("alice@example.com").await;
    let id = outcome.session.id.clone();
    let now = unix_now();

    let replaced = ctx
        .db
        .write(move |conn| {
            let id = id.clone();
            Box::pin(async move {
                let live = conn
                    .sessions()
                    .replace_tokens(&id, "access-2", "refresh-2", now + 60, now)
                    .await?;
                conn.sessions().deactivate(&id).await?;
                let inactive = conn
                    .sessions()
                    .replace_tokens(&id, "access-3", "refresh-3", now + 60, now)
                    .await?;
                Ok::<_, StoreError>((live, inactive))
            })
        })
        .await
        .unwrap();

    assert_eq!(replaced, (true, false));
    let err = ctx.auth.find_session("refresh-3").await.unwrap_err();
    assert!(matches!(err, AuthError::SessionNotFound));
}

#[tokio::test]
async fn test_logout_everywhere_only_affects_one_user() {
    let ctx = TestContext::new().await;
    let alice = ctx.register("alice@example.com").await;
    ctx.auth
        .login("alice@example.com", common::TEST_PASSWORD, &client())
        .await
        .unwrap();
    let bob = ctx.register("bob@example.com").await;

    assert_eq!(ctx.auth.active_session_count(&alice.user.id).await.unwrap(), 2);
    assert_eq!(ctx.auth.active_session_count(&bob.user.id).await.unwrap(), 1);

    assert_eq!(ctx.auth.logout_everywhere(&alice.user.id).await.unwrap(), 2);

    assert_eq!(ctx.auth.active_session_count(&alice.user.id).await.unwrap(), 0);
    assert_eq!(ctx.auth.active_session_count(&bob.user.id).await.unwrap(), 1);
    assert!(ctx.auth.list_sessions(&alice.user.id).await.unwrap().is_empty());

    let err = ctx
        .auth
        .authenticate(&alice.tokens.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SessionNotFound));
    assert!(ctx.auth.authenticate(&bob.tokens.access_token).await.is_ok());

    // Nothing left to deactivate.
    assert_eq!(ctx.auth.logout_everywhere(&alice.user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_sessions_newest_first() {
    let ctx = TestContext::new().await;
    let first = ctx.register("alice@example.com").await;
    let second = ctx
        .auth
        .login(
            "alice@example.com",
            common::TEST_PASSWORD,
            &ClientInfo::new("10.0.0.2", "other-device"),
        )
        .await
        .unwrap();

    let sessions = ctx.auth.list_sessions(&first.user.id).await.unwrap();
    let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, [second.session.id.as_str(), first.session.id.as_str()]);
    assert_eq!(sessions[0].user_agent.as_deref(), Some("other-device"));
}

#[tokio::test]
async fn test_expire_sessions_deactivates_without_deleting() {
    let ctx = TestContext::new().await;
    let live = ctx.register("alice@example.com").await;
    let user_id = live.user.id.clone();
    let now = unix_now();

    let stale = ctx
        .db
        .write(move |conn| {
            let user_id = user_id.clone();
            Box::pin(async move {
                let new = NewSession {
                    user_id: &user_id,
                    access_token: "stale-access",
                    refresh_token: "stale-refresh",
                    expires_at: now - 10,
                    client_ip: None,
                    user_agent: None,
                };
                conn.sessions().create(&new, now - 100).await
            })
        })
        .await
        .unwrap();

    assert_eq!(ctx.auth.expire_sessions().await.unwrap(), 1);
    assert_eq!(ctx.auth.expire_sessions().await.unwrap(), 0);

    let id = stale.id.clone();
    let row = ctx
        .db
        .read(move |conn| Box::pin(async move { conn.sessions().get(&id).await }))
        .await
        .unwrap()
        .unwrap();
    assert!(!row.is_active);

    let sessions = ctx.auth.list_sessions(&live.user.id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, live.session.id);
}
