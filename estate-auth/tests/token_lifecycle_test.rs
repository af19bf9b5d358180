//! Issue, validate, refresh and revoke against in-memory stores.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{registration, TestApp, FINGERPRINT, OTHER_FINGERPRINT};
use estate_auth::{
    config::AuthConfig,
    models::{Platform, Role, Scope, ScopeLevel, TokenType, TrustLevel},
    services::{AuthError, JwtService},
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn issued_access_token_validates() {
    let app = TestApp::new();
    let manager = app.add_principal("manager-1", Role::Manager).await;
    app.assign(&manager, ScopeLevel::Estate, app.hierarchy.estate_1).await;

    let outcome = app.login_web("manager-1").await;
    assert!(outcome.tokens.offline.is_none());
    assert!(outcome.device.is_none());

    let claims = app
        .state
        .tokens
        .validate(&cancel(), &outcome.tokens.access.token, None)
        .await
        .unwrap();
    assert_eq!(claims.sub, manager.principal_id);
    assert_eq!(claims.role, Role::Manager);
    assert_eq!(claims.typ, TokenType::Access);
    assert_eq!(claims.platform, Platform::Web);
    assert!(!claims.permissions.is_empty());

    match claims.scope {
        Some(Scope::Limited(ids)) => {
            assert!(ids.estate_ids.contains(&app.hierarchy.estate_1));
            assert!(!ids.estate_ids.contains(&app.hierarchy.estate_2));
        }
        other => panic!("unexpected scope snapshot: {:?}", other),
    }
}

#[tokio::test]
async fn username_lookup_ignores_case() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    assert!(app.login("MANAGER-1", Platform::Web, None, false).await.is_ok());
}

#[tokio::test]
async fn bad_credentials_are_indistinguishable() {
    let app = TestApp::new();
    let manager = app.add_principal("manager-1", Role::Manager).await;

    let unknown = app.login("nobody", Platform::Web, None, false).await;
    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));

    let wrong_password = app
        .state
        .auth
        .login(
            &cancel(),
            estate_auth::services::LoginCommand {
                username: "manager-1".to_string(),
                password: estate_auth::utils::Password::new("not-the-password"),
                platform: Platform::Web,
                device: None,
                remember_device: false,
            },
        )
        .await;
    assert!(matches!(wrong_password, Err(AuthError::InvalidCredentials)));

    app.deactivate(&manager);
    let inactive = app.login("manager-1", Platform::Web, None, false).await;
    assert!(matches!(inactive, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn platform_access_follows_role_table() {
    let app = TestApp::new();
    app.add_principal("mandor-1", Role::Mandor).await;
    app.add_principal("root", Role::SuperAdmin).await;

    let web = app.login("mandor-1", Platform::Web, None, false).await;
    assert!(matches!(web, Err(AuthError::InsufficientPermission(_))));

    let mobile = app
        .login("root", Platform::Mobile, Some(registration("hw-1", FINGERPRINT)), false)
        .await;
    assert!(matches!(mobile, Err(AuthError::InsufficientPermission(_))));
}

#[tokio::test]
async fn mobile_login_requires_device() {
    let app = TestApp::new();
    app.add_principal("mandor-1", Role::Mandor).await;

    let result = app.login("mandor-1", Platform::Mobile, None, true).await;
    assert!(matches!(result, Err(AuthError::DeviceRequired)));
}

#[tokio::test]
async fn offline_token_only_for_remembered_mobile_devices() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;

    let web = app.login("manager-1", Platform::Web, None, true).await.unwrap();
    assert!(web.tokens.offline.is_none());

    let mobile = app.login_mobile("manager-1", false).await;
    assert!(mobile.tokens.offline.is_none());

    let remembered = app.login_mobile("manager-1", true).await;
    let offline = remembered.tokens.offline.expect("offline token");

    let days = (offline.expires_at - Utc::now()).num_days();
    assert!((29..=30).contains(&days), "offline lifetime was {} days", days);

    let claims = app
        .state
        .tokens
        .validate_offline(&cancel(), &offline.token, Some(FINGERPRINT))
        .await
        .unwrap();
    assert_eq!(claims.typ, TokenType::Offline);
    assert_eq!(claims.device_id, remembered.tokens.device_id);
}

#[tokio::test]
async fn token_classes_are_not_interchangeable() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let outcome = app.login_mobile("manager-1", true).await;

    let refresh_as_access = app
        .state
        .tokens
        .validate(&cancel(), &outcome.tokens.refresh.token, Some(FINGERPRINT))
        .await;
    assert!(matches!(refresh_as_access, Err(AuthError::TokenMalformed)));

    let access_as_offline = app
        .state
        .tokens
        .validate_offline(&cancel(), &outcome.tokens.access.token, Some(FINGERPRINT))
        .await;
    assert!(matches!(access_as_offline, Err(AuthError::TokenMalformed)));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let app = TestApp::new();
    let manager = app.add_principal("manager-1", Role::Manager).await;

    let jwt = JwtService::new(&AuthConfig::for_tests().jwt);
    let claims = jwt.new_claims(
        TokenType::Access,
        &manager,
        None,
        Platform::Web,
        Utc::now() - ChronoDuration::hours(2),
    );
    let token = jwt.encode(&claims).unwrap();

    let result = app.state.tokens.validate(&cancel(), &token, None).await;
    assert!(matches!(result, Err(AuthError::TokenExpired)));
}

#[tokio::test]
async fn unrecorded_token_is_rejected() {
    let app = TestApp::new();
    let manager = app.add_principal("manager-1", Role::Manager).await;

    // Correctly signed but never issued through the service.
    let jwt = JwtService::new(&AuthConfig::for_tests().jwt);
    let claims = jwt.new_claims(TokenType::Access, &manager, None, Platform::Web, Utc::now());
    let token = jwt.encode(&claims).unwrap();

    let result = app.state.tokens.validate(&cancel(), &token, None).await;
    assert!(matches!(result, Err(AuthError::TokenRevoked)));
}

#[tokio::test]
async fn revocation_is_visible_through_a_warm_cache() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let outcome = app.login_web("manager-1").await;
    let token = outcome.tokens.access.token;

    for _ in 0..3 {
        app.state.tokens.validate(&cancel(), &token, None).await.unwrap();
    }
    assert!(app.state.cache.stats().hits >= 3);

    assert!(app.state.tokens.revoke(&cancel(), &token).await.unwrap());

    let result = app.state.tokens.validate(&cancel(), &token, None).await;
    assert!(matches!(result, Err(AuthError::TokenRevoked)));

    // A second revoke reports that nothing changed.
    assert!(!app.state.tokens.revoke(&cancel(), &token).await.unwrap());
}

#[tokio::test]
async fn revocation_is_visible_after_restart() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let token = app.login_web("manager-1").await.tokens.access.token;

    app.state.tokens.revoke(&cancel(), &token).await.unwrap();

    let restarted = app.restart();
    let result = restarted.state.tokens.validate(&cancel(), &token, None).await;
    assert!(matches!(result, Err(AuthError::TokenRevoked)));
}

#[tokio::test]
async fn revoke_all_covers_every_class() {
    let app = TestApp::new();
    let manager = app.add_principal("manager-1", Role::Manager).await;
    let mobile = app.login_mobile("manager-1", true).await;
    let web = app.login_web("manager-1").await;

    let revoked = app
        .state
        .tokens
        .revoke_all(&cancel(), manager.principal_id)
        .await
        .unwrap();
    assert_eq!(revoked, 5);

    let tokens = &app.state.tokens;
    assert!(matches!(
        tokens.validate(&cancel(), &web.tokens.access.token, None).await,
        Err(AuthError::TokenRevoked)
    ));
    assert!(matches!(
        tokens
            .validate(&cancel(), &mobile.tokens.access.token, Some(FINGERPRINT))
            .await,
        Err(AuthError::TokenRevoked)
    ));
    let offline = mobile.tokens.offline.unwrap();
    assert!(matches!(
        tokens.validate_offline(&cancel(), &offline.token, Some(FINGERPRINT)).await,
        Err(AuthError::TokenRevoked)
    ));
    assert!(matches!(
        tokens.refresh(&cancel(), &web.tokens.refresh.token, None).await,
        Err(AuthError::InvalidRefreshToken)
    ));
}

#[tokio::test]
async fn refresh_rotates_and_old_token_replays() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let outcome = app.login_mobile("manager-1", true).await;
    let old_refresh = outcome.tokens.refresh.token.clone();

    let rotated = app
        .state
        .tokens
        .refresh(&cancel(), &old_refresh, Some(FINGERPRINT))
        .await
        .unwrap();
    assert_ne!(rotated.refresh.token, old_refresh);
    assert!(rotated.offline.is_none());
    assert_eq!(rotated.device_id, outcome.tokens.device_id);

    app.state
        .tokens
        .validate(&cancel(), &rotated.access.token, Some(FINGERPRINT))
        .await
        .unwrap();

    let replay = app
        .state
        .tokens
        .refresh(&cancel(), &old_refresh, Some(FINGERPRINT))
        .await;
    assert!(matches!(replay, Err(AuthError::RefreshReplay)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_has_single_winner() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let refresh = app.login_mobile("manager-1", false).await.tokens.refresh.token;
    app.store.set_latency(Duration::from_millis(2));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let tokens = app.state.tokens.clone();
        let refresh = refresh.clone();
        handles.push(tokio::spawn(async move {
            tokens
                .refresh(&CancellationToken::new(), &refresh, Some(FINGERPRINT))
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(AuthError::RefreshReplay) => {}
            Err(other) => panic!("unexpected refresh failure: {:?}", other),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revoke_all_during_refresh_leaves_nothing_live() {
    let app = TestApp::new();
    app.store.set_latency(Duration::from_millis(2));

    for round in 0..10 {
        let username = format!("manager-{}", round);
        let principal = app.add_principal(&username, Role::Manager).await;
        let refresh = app.login_web(&username).await.tokens.refresh.token;

        let tokens = app.state.tokens.clone();
        let refreshing = tokio::spawn(async move {
            tokens.refresh(&CancellationToken::new(), &refresh, None).await
        });
        let tokens = app.state.tokens.clone();
        let revoking = tokio::spawn(async move {
            tokens
                .revoke_all(&CancellationToken::new(), principal.principal_id)
                .await
        });

        revoking.await.unwrap().unwrap();
        match refreshing.await.unwrap() {
            Ok(bundle) => {
                let tokens = &app.state.tokens;
                assert!(matches!(
                    tokens.validate(&cancel(), &bundle.access.token, None).await,
                    Err(AuthError::TokenRevoked)
                ));
                assert!(matches!(
                    tokens.refresh(&cancel(), &bundle.refresh.token, None).await,
                    Err(AuthError::InvalidRefreshToken)
                ));
            }
            Err(AuthError::InvalidRefreshToken) | Err(AuthError::RefreshReplay) => {}
            Err(other) => panic!("unexpected refresh failure: {:?}", other),
        }
    }
}

#[tokio::test]
async fn refresh_denied_for_deactivated_principal() {
    let app = TestApp::new();
    let manager = app.add_principal("manager-1", Role::Manager).await;
    let refresh = app.login_web("manager-1").await.tokens.refresh.token;

    app.deactivate(&manager);
    let result = app.state.tokens.refresh(&cancel(), &refresh, None).await;
    assert!(matches!(result, Err(AuthError::InvalidRefreshToken)));
}

#[tokio::test]
async fn device_binding_is_enforced() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let outcome = app.login_mobile("manager-1", false).await;
    let token = outcome.tokens.access.token;
    let tokens = &app.state.tokens;

    assert!(matches!(
        tokens.validate(&cancel(), &token, Some(OTHER_FINGERPRINT)).await,
        Err(AuthError::DeviceMismatch)
    ));
    assert!(matches!(
        tokens.validate(&cancel(), &token, None).await,
        Err(AuthError::DeviceMismatch)
    ));
    tokens.validate(&cancel(), &token, Some(FINGERPRINT)).await.unwrap();
}

#[tokio::test]
async fn device_trust_grows_with_successful_validations() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let outcome = app.login_mobile("manager-1", false).await;
    let device_id = outcome.tokens.device_id.unwrap();
    let token = outcome.tokens.access.token;

    // Threshold is 3 in the test configuration.
    for _ in 0..3 {
        app.state
            .tokens
            .validate(&cancel(), &token, Some(FINGERPRINT))
            .await
            .unwrap();
    }
    let principal_id = outcome.principal.principal_id;
    let devices = app.state.devices.list_devices(&cancel(), principal_id).await.unwrap();
    let device = devices.iter().find(|d| d.device_id == device_id).unwrap();
    assert_eq!(device.trust_level, TrustLevel::Trusted);

    let reset = app.state.devices.reset_trust(&cancel(), device_id).await.unwrap();
    assert_eq!(reset.trust_level, TrustLevel::Untrusted);
    assert_eq!(reset.validation_streak, 0);
}

#[tokio::test]
async fn unbound_device_tokens_stop_working() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let outcome = app.login_mobile("manager-1", true).await;
    let device_id = outcome.tokens.device_id.unwrap();

    let revoked = app
        .state
        .tokens
        .revoke_device(&cancel(), outcome.principal.principal_id, device_id)
        .await
        .unwrap();
    assert_eq!(revoked, 3);
    assert!(app.state.devices.unbind(&cancel(), device_id).await.unwrap().is_some());

    let result = app
        .state
        .tokens
        .validate(&cancel(), &outcome.tokens.access.token, Some(FINGERPRINT))
        .await;
    assert!(matches!(result, Err(AuthError::TokenRevoked)));
}

#[tokio::test]
async fn store_outage_denies_on_cache_miss() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let token = app.login_web("manager-1").await.tokens.access.token;

    app.state.cache.clear();
    app.store.fail_next(100);
    let result = app.state.tokens.validate(&cancel(), &token, None).await;
    assert!(matches!(result, Err(AuthError::ServiceUnavailable(_))));

    app.store.fail_next(0);
    app.state.tokens.validate(&cancel(), &token, None).await.unwrap();
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let token = app.login_web("manager-1").await.tokens.access.token;

    app.state.cache.clear();
    app.store.fail_next(1);
    app.state.tokens.validate(&cancel(), &token, None).await.unwrap();
}

#[tokio::test]
async fn cancelled_caller_gets_no_answer() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let token = app.login_web("manager-1").await.tokens.access.token;
    app.state.cache.clear();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let result = app.state.tokens.validate(&cancelled, &token, None).await;
    assert!(matches!(result, Err(AuthError::Cancelled)));
}

#[tokio::test]
async fn introspection_never_errors() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    let outcome = app.login_mobile("manager-1", true).await;
    let tokens = &app.state.tokens;

    let live = tokens
        .introspect(&cancel(), &outcome.tokens.access.token, Some(FINGERPRINT))
        .await;
    assert!(live.active);
    assert_eq!(live.claims.unwrap().typ, TokenType::Access);

    let offline = outcome.tokens.offline.unwrap();
    let live_offline = tokens.introspect(&cancel(), &offline.token, Some(FINGERPRINT)).await;
    assert!(live_offline.active);

    let garbage = tokens.introspect(&cancel(), "not-a-token", None).await;
    assert!(!garbage.active);
    assert!(garbage.claims.is_none());

    tokens.revoke(&cancel(), &outcome.tokens.access.token).await.unwrap();
    let revoked = tokens
        .introspect(&cancel(), &outcome.tokens.access.token, Some(FINGERPRINT))
        .await;
    assert!(!revoked.active);
}

#[tokio::test]
async fn warm_up_loads_recent_credentials_into_a_cold_cache() {
    let app = TestApp::new();
    app.add_principal("manager-1", Role::Manager).await;
    app.login_web("manager-1").await;
    app.login_web("manager-1").await;

    let restarted = app.restart();
    assert!(restarted.state.cache.is_empty());

    let loaded = restarted.state.tokens.warm_up(&cancel(), 10).await.unwrap();
    assert_eq!(loaded, 4);
    assert_eq!(restarted.state.cache.stats().size, 4);

    assert_eq!(restarted.state.tokens.warm_up(&cancel(), 0).await.unwrap(), 0);
}
