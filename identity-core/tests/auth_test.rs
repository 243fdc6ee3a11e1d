mod common;

use chrono::Duration;
use common::{PASSWORD, setup, setup_with};
use identity_core::models::codes;
use identity_core::services::{AuthError, IdentityStore, LoginRequest};

fn login(username: &str, password: &str) -> LoginRequest {
    LoginRequest {
        username: username.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn test_login_returns_tokens_and_session_user() {
    let ctx = setup();
    let viewers = ctx.role("Viewers", &[codes::ACCOUNTS_VIEW]).await;
    let alice = ctx.seed("alice", &[viewers.id], false);

    let response = ctx.identity.auth.login(login("alice", PASSWORD)).await.unwrap();

    assert_eq!(response.tokens.token_type, "Bearer");
    assert_eq!(response.tokens.expires_in, 15 * 60);
    assert_eq!(response.user.id, alice.id);
    assert_eq!(response.user.full_name, "alice");
    assert_eq!(response.user.roles, vec!["Viewers".to_string()]);
    assert!(
        response
            .user
            .permissions
            .iter()
            .any(|p| p.as_str() == codes::ACCOUNTS_VIEW)
    );

    let stored = ctx.reload(alice.id).await;
    assert_eq!(stored.last_login, Some(common::start_time()));

    let verified = ctx.identity.auth.verify(&response.tokens.access_token).unwrap();
    assert_eq!(verified.principal_id, alice.id);
}

#[tokio::test]
async fn test_unknown_user_and_wrong_password_are_indistinguishable() {
    let ctx = setup();
    ctx.seed("alice", &[], false);

    let unknown = ctx
        .identity
        .auth
        .login(login("nobody", PASSWORD))
        .await
        .unwrap_err();
    let wrong = ctx
        .identity
        .auth
        .login(login("alice", "not-the-password"))
        .await
        .unwrap_err();

    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert_eq!(unknown.to_string(), wrong.to_string());
}

#[tokio::test]
async fn test_inactive_account_only_reported_after_password_check() {
    let ctx = setup();
    let admin = ctx.superuser("admin");
    let bob = ctx.seed("bob", &[], false);
    ctx.identity.accounts.delete(&admin, bob.id).await.unwrap();

    let right = ctx.identity.auth.login(login("bob", PASSWORD)).await;
    assert!(matches!(right, Err(AuthError::InactiveAccount)));

    let wrong = ctx.identity.auth.login(login("bob", "not-the-password")).await;
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn test_login_rejects_empty_fields() {
    let ctx = setup();
    let result = ctx.identity.auth.login(login("", "")).await;
    assert!(matches!(result, Err(AuthError::Validation(_))));
}

#[tokio::test]
async fn test_access_token_expires_exactly_at_exp() {
    let ctx = setup();
    let alice = ctx.seed("alice", &[], false);
    let pair = ctx.identity.tokens.issue(alice.id).unwrap();

    ctx.clock.advance(Duration::minutes(15) - Duration::seconds(1));
    assert!(ctx.identity.auth.verify(&pair.access_token).is_ok());

    ctx.clock.advance(Duration::seconds(1));
    assert!(matches!(
        ctx.identity.auth.verify(&pair.access_token),
        Err(AuthError::InvalidToken)
    ));

    let introspection = ctx.identity.auth.introspect(&pair.access_token);
    assert!(!introspection.valid);
    assert!(introspection.principal_id.is_none());
}

#[tokio::test]
async fn test_token_kinds_are_not_interchangeable() {
    let ctx = setup();
    let alice = ctx.seed("alice", &[], false);
    let pair = ctx.identity.tokens.issue(alice.id).unwrap();

    assert!(matches!(
        ctx.identity.auth.verify(&pair.refresh_token),
        Err(AuthError::InvalidToken)
    ));
    assert!(matches!(
        ctx.identity.auth.refresh(&pair.access_token).await,
        Err(AuthError::InvalidToken)
    ));
}

#[tokio::test]
async fn test_refresh_rotates_and_rejects_old_token() {
    let ctx = setup();
    let alice = ctx.seed("alice", &[], false);
    let pair = ctx.identity.tokens.issue(alice.id).unwrap();

    let refreshed = ctx.identity.auth.refresh(&pair.refresh_token).await.unwrap();
    let rotated = refreshed.refresh_token.expect("rotation issues a new refresh token");
    assert_ne!(rotated, pair.refresh_token);

    let verified = ctx.identity.auth.verify(&refreshed.access_token).unwrap();
    assert_eq!(verified.principal_id, alice.id);

    assert!(matches!(
        ctx.identity.auth.refresh(&pair.refresh_token).await,
        Err(AuthError::Revoked)
    ));
    assert!(ctx.identity.auth.refresh(&rotated).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refreshes_of_one_token_have_one_winner() {
    let ctx = setup();
    let alice = ctx.seed("alice", &[], false);
    let pair = ctx.identity.tokens.issue(alice.id).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let auth = ctx.identity.auth.clone();
        let token = pair.refresh_token.clone();
        handles.push(tokio::spawn(async move { auth.refresh(&token).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(AuthError::Revoked) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_refresh_without_rotation_keeps_token_usable() {
    let mut config = common::config();
    config.jwt.rotate_refresh_tokens = false;
    let ctx = setup_with(config);
    let alice = ctx.seed("alice", &[], false);
    let pair = ctx.identity.tokens.issue(alice.id).unwrap();

    let first = ctx.identity.auth.refresh(&pair.refresh_token).await.unwrap();
    assert!(first.refresh_token.is_none());
    assert!(ctx.identity.auth.refresh(&pair.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_logout_revokes_refresh_token_permanently() {
    let ctx = setup();
    ctx.seed("alice", &[], false);
    let response = ctx.identity.auth.login(login("alice", PASSWORD)).await.unwrap();
    let refresh_token = response.tokens.refresh_token;

    ctx.identity.auth.logout(&refresh_token).await.unwrap();
    // Logging out twice is harmless
    ctx.identity.auth.logout(&refresh_token).await.unwrap();

    for _ in 0..2 {
        assert!(matches!(
            ctx.identity.auth.refresh(&refresh_token).await,
            Err(AuthError::Revoked)
        ));
    }

    // The access token is stateless and survives logout
    assert!(ctx.identity.auth.verify(&response.tokens.access_token).is_ok());
}

#[tokio::test]
async fn test_expired_refresh_token_is_invalid() {
    let ctx = setup();
    let alice = ctx.seed("alice", &[], false);
    let pair = ctx.identity.tokens.issue(alice.id).unwrap();

    ctx.clock.advance(Duration::days(7));
    assert!(matches!(
        ctx.identity.auth.refresh(&pair.refresh_token).await,
        Err(AuthError::InvalidToken)
    ));
}

#[tokio::test]
async fn test_revocation_disabled_refuses_refresh_and_logout() {
    let mut config = common::config();
    config.jwt.revocation_enabled = false;
    let ctx = setup_with(config);
    let alice = ctx.seed("alice", &[], false);
    let pair = ctx.identity.tokens.issue(alice.id).unwrap();

    assert!(matches!(
        ctx.identity.auth.refresh(&pair.refresh_token).await,
        Err(AuthError::RevocationNotConfigured)
    ));
    assert!(matches!(
        ctx.identity.auth.logout(&pair.refresh_token).await,
        Err(AuthError::RevocationNotConfigured)
    ));
    assert!(ctx.identity.auth.verify(&pair.access_token).is_ok());
}

#[tokio::test]
async fn test_revocation_store_outage_fails_refresh() {
    let ctx = setup();
    let alice = ctx.seed("alice", &[], false);
    let pair = ctx.identity.tokens.issue(alice.id).unwrap();

    ctx.cache.set_available(false);
    assert!(matches!(
        ctx.identity.auth.refresh(&pair.refresh_token).await,
        Err(AuthError::Cache(_))
    ));
}

#[tokio::test]
async fn test_current_principal_requires_existing_active_user() {
    let ctx = setup();
    let admin = ctx.superuser("admin");
    let bob = ctx.seed("bob", &[], false);
    let pair = ctx.identity.tokens.issue(bob.id).unwrap();

    let current = ctx
        .identity
        .auth
        .current_principal(&pair.access_token)
        .await
        .unwrap();
    assert_eq!(current.id, bob.id);

    ctx.identity.accounts.delete(&admin, bob.id).await.unwrap();
    assert!(matches!(
        ctx.identity.auth.current_principal(&pair.access_token).await,
        Err(AuthError::InactiveAccount)
    ));

    let ghost = ctx
        .identity
        .tokens
        .issue(identity_core::models::PrincipalId::new())
        .unwrap();
    assert!(matches!(
        ctx.identity.auth.current_principal(&ghost.access_token).await,
        Err(AuthError::InvalidToken)
    ));
}

#[tokio::test]
async fn test_change_own_password_then_login() {
    let ctx = setup();
    let alice = ctx.seed("alice", &[], false);
    let new_password = "a-much-better-passphrase";

    let wrong = ctx
        .identity
        .accounts
        .change_own_password(&alice, "not-the-password", new_password)
        .await;
    assert!(matches!(wrong, Err(AuthError::WrongOldPassword)));

    let too_short = ctx
        .identity
        .accounts
        .change_own_password(&alice, PASSWORD, "short")
        .await;
    assert!(matches!(too_short, Err(AuthError::Validation(_))));

    ctx.identity
        .accounts
        .change_own_password(&alice, PASSWORD, new_password)
        .await
        .unwrap();

    assert!(matches!(
        ctx.identity.auth.login(login("alice", PASSWORD)).await,
        Err(AuthError::InvalidCredentials)
    ));
    assert!(ctx.identity.auth.login(login("alice", new_password)).await.is_ok());

    let stored = ctx.store.find_principal(alice.id).await.unwrap().unwrap();
    assert_ne!(stored.password_hash, alice.password_hash);
}
