mod common;

use common::{PASSWORD, setup, setup_with};
use identity_core::models::{AccountChanges, AccountFilter, NewAccount, ProfileFields, codes};
use identity_core::services::permissions::cache_key;
use identity_core::services::{AuthError, IdentityStore, LoginRequest};

fn new_account(username: &str) -> NewAccount {
    NewAccount {
        username: username.to_string(),
        email: format!("{}@Example.com", username),
        password: "a-long-enough-password".to_string(),
        first_name: String::new(),
        last_name: String::new(),
        is_active: true,
        profile: ProfileFields::default(),
        role_ids: vec![],
    }
}

#[tokio::test]
async fn test_self_deletion_refused_and_admin_soft_deletes() {
    let ctx = setup();
    let alice = ctx.user_with("alice", &[codes::ACCOUNTS_VIEW]).await;
    let admin = ctx.user_with("admin", &[codes::ACCOUNTS_DELETE]).await;

    let result = ctx.identity.accounts.delete(&alice, alice.id).await;
    assert!(matches!(result, Err(AuthError::SelfDeletion)));
    let untouched = ctx.identity.accounts.get(&alice, alice.id).await.unwrap();
    assert!(untouched.principal.is_active);
    assert!(!untouched.profile.is_deleted());

    // Populate alice's cache entry so the delete has something to invalidate
    ctx.identity.resolver.resolve(alice.id).await.unwrap();
    assert!(ctx.cache.contains_key(&cache_key(alice.id)));

    let deleted = ctx.identity.accounts.delete(&admin, alice.id).await.unwrap();
    assert!(!deleted.principal.is_active);
    assert_eq!(deleted.profile.deleted_at, Some(common::start_time()));
    assert!(!ctx.cache.contains_key(&cache_key(alice.id)));
}

#[tokio::test]
async fn test_delete_requires_permission() {
    let ctx = setup();
    let alice = ctx.user_with("alice", &[codes::ACCOUNTS_VIEW]).await;
    let bob = ctx.seed("bob", &[], false);

    let result = ctx.identity.accounts.delete(&alice, bob.id).await;
    assert!(matches!(
        result,
        Err(AuthError::PermissionDenied { ref operation }) if operation == "delete_account"
    ));
    assert!(ctx.reload(bob.id).await.is_active);
}

#[tokio::test]
async fn test_self_protection_applies_to_superusers() {
    let ctx = setup();
    let admins = ctx.role("Administrators", &codes::ALL).await;
    let root = ctx.seed("root", &[admins.id], true);

    let deactivate = AccountChanges {
        is_active: Some(false),
        ..Default::default()
    };
    assert!(matches!(
        ctx.identity.accounts.update(&root, root.id, deactivate).await,
        Err(AuthError::SelfDeactivation)
    ));

    assert!(matches!(
        ctx.identity.accounts.delete(&root, root.id).await,
        Err(AuthError::SelfDeletion)
    ));

    assert!(matches!(
        ctx.identity.accounts.remove_role(&root, root.id, admins.id).await,
        Err(AuthError::SelfDemotion)
    ));

    let drop_roles = AccountChanges {
        role_ids: Some(vec![]),
        ..Default::default()
    };
    assert!(matches!(
        ctx.identity.accounts.update(&root, root.id, drop_roles).await,
        Err(AuthError::SelfDemotion)
    ));

    assert!(matches!(
        ctx.identity.roles.delete_role(&root, admins.id).await,
        Err(AuthError::SelfDemotion)
    ));

    let after = ctx.reload(root.id).await;
    assert!(after.is_active);
    assert!(after.holds_role(admins.id));
}

#[tokio::test]
async fn test_admin_can_demote_someone_else() {
    let ctx = setup();
    let admins = ctx.role("Administrators", &codes::ALL).await;
    let root = ctx.seed("root", &[admins.id], false);
    let other = ctx.seed("other", &[admins.id], false);

    ctx.identity
        .accounts
        .remove_role(&root, other.id, admins.id)
        .await
        .unwrap();
    assert!(!ctx.reload(other.id).await.holds_role(admins.id));
}

#[tokio::test]
async fn test_create_account_normalizes_and_can_log_in() {
    let ctx = setup();
    let creator = ctx.user_with("creator", &[codes::ACCOUNTS_CREATE]).await;

    let mut input = new_account("carol");
    input.first_name = "Carol".to_string();
    input.profile.department = Some("  Finance ".to_string());
    let account = ctx.identity.accounts.create(&creator, input).await.unwrap();

    assert_eq!(account.principal.email, "carol@example.com");
    assert!(!account.principal.is_superuser);
    assert_eq!(account.profile.department.as_deref(), Some("Finance"));
    assert_eq!(account.profile.principal_id, account.principal.id);

    let response = ctx
        .identity
        .auth
        .login(LoginRequest {
            username: "carol".to_string(),
            password: "a-long-enough-password".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.user.id, account.principal.id);
}

#[tokio::test]
async fn test_create_account_rejects_duplicates_and_bad_input() {
    let ctx = setup();
    let creator = ctx.superuser("creator");
    ctx.identity
        .accounts
        .create(&creator, new_account("dave"))
        .await
        .unwrap();

    let duplicate_name = ctx.identity.accounts.create(&creator, new_account("dave")).await;
    assert!(matches!(duplicate_name, Err(AuthError::Conflict(ref what)) if what == "Username"));

    let mut same_email = new_account("dave2");
    same_email.email = "DAVE@example.com".to_string();
    let duplicate_email = ctx.identity.accounts.create(&creator, same_email).await;
    assert!(matches!(duplicate_email, Err(AuthError::Conflict(ref what)) if what == "Email"));

    let mut weak = new_account("erin");
    weak.password = "erin".to_string();
    assert!(matches!(
        ctx.identity.accounts.create(&creator, weak).await,
        Err(AuthError::Validation(_))
    ));

    let mut bad_email = new_account("frank");
    bad_email.email = "not-an-email".to_string();
    assert!(matches!(
        ctx.identity.accounts.create(&creator, bad_email).await,
        Err(AuthError::Validation(_))
    ));

    let mut unknown_role = new_account("grace");
    unknown_role.role_ids = vec![identity_core::models::RoleId::new()];
    assert!(matches!(
        ctx.identity.accounts.create(&creator, unknown_role).await,
        Err(AuthError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_create_account_trims_before_validating() {
    let ctx = setup();
    let creator = ctx.superuser("creator");
    let editors = ctx.role("Editors", &[codes::ACCOUNTS_UPDATE]).await;

    let mut blank = new_account("blank");
    blank.username = "    ".to_string();
    assert!(matches!(
        ctx.identity.accounts.create(&creator, blank).await,
        Err(AuthError::Validation(_))
    ));

    let mut padded = new_account("heidi");
    padded.username = "  heidi ".to_string();
    padded.role_ids = vec![editors.id, editors.id];
    let account = ctx.identity.accounts.create(&creator, padded).await.unwrap();
    assert_eq!(account.principal.username, "heidi");
    assert_eq!(account.principal.roles.len(), 1);
    assert!(account.principal.holds_role(editors.id));
}

#[tokio::test]
async fn test_active_account_quota() {
    let mut config = common::config();
    config.accounts.max_active_accounts = Some(3);
    let ctx = setup_with(config);
    let creator = ctx.superuser("creator");

    ctx.identity.accounts.create(&creator, new_account("u1")).await.unwrap();
    ctx.identity.accounts.create(&creator, new_account("u2")).await.unwrap();

    let over = ctx.identity.accounts.create(&creator, new_account("u3")).await;
    assert!(matches!(over, Err(AuthError::QuotaExceeded { limit: 3 })));

    // Soft-deleted accounts no longer count
    let u1 = ctx
        .store
        .find_principal_by_username("u1")
        .await
        .unwrap()
        .unwrap();
    ctx.identity.accounts.delete(&creator, u1.id).await.unwrap();
    assert!(ctx.identity.accounts.create(&creator, new_account("u3")).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_creates_never_exceed_quota() {
    let mut config = common::config();
    config.accounts.max_active_accounts = Some(4);
    let ctx = setup_with(config);
    let creator = ctx.superuser("creator");

    let mut handles = Vec::new();
    for i in 0..12 {
        let accounts = ctx.identity.accounts.clone();
        let creator = creator.clone();
        handles.push(tokio::spawn(async move {
            accounts.create(&creator, new_account(&format!("racer{}", i))).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(AuthError::QuotaExceeded { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(created, 3);
}

#[tokio::test]
async fn test_soft_delete_round_trip_and_restore() {
    let ctx = setup();
    let admin = ctx.superuser("admin");
    let bob = ctx.seed("bob", &[], false);

    ctx.identity.accounts.delete(&admin, bob.id).await.unwrap();

    let fetched = ctx.identity.accounts.get(&admin, bob.id).await.unwrap();
    assert!(!fetched.principal.is_active);
    assert!(fetched.profile.is_deleted());

    let restored = ctx.identity.accounts.restore_profile(&admin, bob.id).await.unwrap();
    assert!(!restored.is_deleted());
    // Restoring the profile does not reactivate the principal
    assert!(!ctx.reload(bob.id).await.is_active);

    let reactivate = AccountChanges {
        is_active: Some(true),
        ..Default::default()
    };
    let account = ctx
        .identity
        .accounts
        .update(&admin, bob.id, reactivate)
        .await
        .unwrap();
    assert!(account.principal.is_active);
}

#[tokio::test]
async fn test_visibility_of_other_accounts() {
    let ctx = setup();
    let viewer = ctx.user_with("viewer", &[codes::ACCOUNTS_VIEW]).await;
    let plain = ctx.seed("plain", &[], false);

    let all = ctx
        .identity
        .accounts
        .list(&viewer, &AccountFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let own = ctx
        .identity
        .accounts
        .list(&plain, &AccountFilter::default())
        .await
        .unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].principal.id, plain.id);

    assert!(matches!(
        ctx.identity.accounts.get(&plain, viewer.id).await,
        Err(AuthError::NotFound(_))
    ));
    assert!(ctx.identity.accounts.get(&viewer, plain.id).await.is_ok());

    let filtered = ctx
        .identity
        .accounts
        .list(
            &viewer,
            &AccountFilter {
                username_contains: Some("PLA".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].principal.username, "plain");
}

#[tokio::test]
async fn test_get_other_account_reports_store_outage() {
    let ctx = setup();
    let viewer = ctx.user_with("viewer", &[codes::ACCOUNTS_VIEW]).await;
    let plain = ctx.seed("plain", &[], false);

    ctx.store.set_available(false);

    assert!(matches!(
        ctx.identity.accounts.get(&viewer, plain.id).await,
        Err(AuthError::Store(_))
    ));
    assert!(matches!(
        ctx.identity.accounts.list(&viewer, &AccountFilter::default()).await,
        Err(AuthError::Store(_))
    ));
}

#[tokio::test]
async fn test_update_profile_and_email() {
    let ctx = setup();
    let editor = ctx.user_with("editor", &[codes::ACCOUNTS_UPDATE]).await;
    let bob = ctx.seed("bob", &[], false);

    let changes = AccountChanges {
        email: Some("Bob.New@Example.com".to_string()),
        profile: ProfileFields {
            employee_id: Some("EMP-7".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let account = ctx
        .identity
        .accounts
        .update(&editor, bob.id, changes)
        .await
        .unwrap();
    assert_eq!(account.principal.email, "bob.new@example.com");
    assert_eq!(account.profile.employee_id.as_deref(), Some("EMP-7"));

    let response = ctx.identity.accounts.describe(&account).await.unwrap();
    assert_eq!(response.username, "bob");
    assert_eq!(response.profile.employee_id.as_deref(), Some("EMP-7"));
}

#[tokio::test]
async fn test_account_stats_track_login_and_age() {
    let ctx = setup();
    let viewer = ctx.user_with("viewer", &[codes::ACCOUNTS_VIEW]).await;
    let bob = ctx.seed("bob", &[], false);

    let fresh = ctx.identity.accounts.stats(&viewer, bob.id).await.unwrap();
    assert_eq!(fresh.days_since_creation, 0);
    assert!(fresh.last_login.is_none());
    assert!(fresh.is_active);

    ctx.clock.advance(chrono::Duration::days(45));
    ctx.identity
        .auth
        .login(LoginRequest {
            username: "bob".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();

    let later = ctx.identity.accounts.stats(&bob, bob.id).await.unwrap();
    assert_eq!(later.days_since_creation, 45);
    assert_eq!(later.last_login, Some(ctx.clock_now()));
    assert_eq!(later.created_at, common::start_time());

    assert!(matches!(
        ctx.identity.accounts.stats(&bob, viewer.id).await,
        Err(AuthError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reset_password_is_administrative_only() {
    let ctx = setup();
    let editor = ctx.user_with("editor", &[codes::ACCOUNTS_UPDATE]).await;
    let bob = ctx.seed("bob", &[], false);

    assert!(matches!(
        ctx.identity.accounts.reset_password(&bob, editor.id, "whatever-long").await,
        Err(AuthError::PermissionDenied { .. })
    ));
    assert!(matches!(
        ctx.identity.accounts.reset_password(&editor, editor.id, "whatever-long").await,
        Err(AuthError::Validation(_))
    ));

    ctx.identity
        .accounts
        .reset_password(&editor, bob.id, "brand-new-secret")
        .await
        .unwrap();

    let old = ctx
        .identity
        .auth
        .login(LoginRequest {
            username: "bob".to_string(),
            password: PASSWORD.to_string(),
        })
        .await;
    assert!(matches!(old, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn test_effective_access_visibility() {
    let ctx = setup();
    let viewer = ctx.user_with("viewer", &[codes::ACCOUNTS_VIEW]).await;
    let plain = ctx.seed("plain", &[], false);

    let own = ctx
        .identity
        .accounts
        .effective_access(&plain, plain.id)
        .await
        .unwrap();
    assert!(own.permissions.is_empty());
    assert!(own.roles.is_empty());

    assert!(matches!(
        ctx.identity.accounts.effective_access(&plain, viewer.id).await,
        Err(AuthError::PermissionDenied { .. })
    ));

    let theirs = ctx
        .identity
        .accounts
        .effective_access(&viewer, viewer.id)
        .await
        .unwrap();
    assert_eq!(theirs.roles, vec!["viewer-grants".to_string()]);
}
