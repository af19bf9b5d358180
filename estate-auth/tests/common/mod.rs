//! Shared setup for estate-auth integration tests. Everything runs against
//! in-memory stores; each `TestApp` has its own session cache.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use estate_auth::{
    build_router,
    config::AuthConfig,
    models::{Assignment, DeviceRegistration, Platform, Principal, Role, ScopeLevel},
    services::{LoginCommand, LoginOutcome},
    store::{AssignmentStore, MemoryStore, PrincipalStore},
    utils::{hash_password, Password},
    AppState,
};
use http_body_util::BodyExt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "kebun-sawit-2024";
pub const FINGERPRINT: &str = "android:pixel-7:8f3a9c2e5b7d4f1a9e6c3b8d2a5f7e1c";
pub const OTHER_FINGERPRINT: &str = "android:pixel-7:2b9e7d1c4a6f8e3b5d9c1a7f4e2b8d6a";
pub const ADMIN_KEY: &str = "test-admin-key";

// Argon2 is slow in debug builds; hash the shared password once.
static PASSWORD_HASH: OnceLock<String> = OnceLock::new();

pub fn password_hash() -> &'static str {
    PASSWORD_HASH.get_or_init(|| hash_password(&Password::new(PASSWORD)).unwrap())
}

/// Tenant T with estates E1 (divisions D1a, D1b) and E2 (division D2a).
#[derive(Debug, Clone, Copy)]
pub struct Hierarchy {
    pub tenant: Uuid,
    pub estate_1: Uuid,
    pub estate_2: Uuid,
    pub division_1a: Uuid,
    pub division_1b: Uuid,
    pub division_2a: Uuid,
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub hierarchy: Hierarchy,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AuthConfig::for_tests())
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let hierarchy = Hierarchy {
            tenant: Uuid::new_v4(),
            estate_1: Uuid::new_v4(),
            estate_2: Uuid::new_v4(),
            division_1a: Uuid::new_v4(),
            division_1b: Uuid::new_v4(),
            division_2a: Uuid::new_v4(),
        };
        store.add_estate(hierarchy.estate_1, hierarchy.tenant);
        store.add_estate(hierarchy.estate_2, hierarchy.tenant);
        store.add_division(hierarchy.division_1a, hierarchy.estate_1);
        store.add_division(hierarchy.division_1b, hierarchy.estate_1);
        store.add_division(hierarchy.division_2a, hierarchy.estate_2);

        let state = AppState::in_memory(config, store.clone());
        Self {
            state,
            store,
            hierarchy,
        }
    }

    /// A second app over the same stores with a cold cache, as after a
    /// restart.
    pub fn restart(&self) -> Self {
        Self {
            state: AppState::in_memory((*self.state.config).clone(), self.store.clone()),
            store: self.store.clone(),
            hierarchy: self.hierarchy,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone()).unwrap()
    }

    pub async fn add_principal(&self, username: &str, role: Role) -> Principal {
        let tenant = match role {
            Role::SuperAdmin | Role::AreaManager => None,
            _ => Some(self.hierarchy.tenant),
        };
        let principal = Principal::new(username, password_hash(), role, tenant);
        PrincipalStore::insert(self.store.as_ref(), &principal)
            .await
            .unwrap();
        principal
    }

    pub fn deactivate(&self, principal: &Principal) {
        assert!(self.store.set_principal_active(principal.principal_id, false));
    }

    pub async fn assign(&self, principal: &Principal, level: ScopeLevel, entity_id: Uuid) {
        self.store
            .insert_assignment(&Assignment::new(principal.principal_id, level, entity_id))
            .await
            .unwrap();
    }

    pub async fn login(
        &self,
        username: &str,
        platform: Platform,
        device: Option<DeviceRegistration>,
        remember_device: bool,
    ) -> Result<LoginOutcome, estate_auth::services::AuthError> {
        self.state
            .auth
            .login(
                &CancellationToken::new(),
                LoginCommand {
                    username: username.to_string(),
                    password: Password::new(PASSWORD),
                    platform,
                    device,
                    remember_device,
                },
            )
            .await
    }

    pub async fn login_web(&self, username: &str) -> LoginOutcome {
        self.login(username, Platform::Web, None, false).await.unwrap()
    }

    pub async fn login_mobile(&self, username: &str, remember_device: bool) -> LoginOutcome {
        self.login(
            username,
            Platform::Mobile,
            Some(registration("hw-pixel-7", FINGERPRINT)),
            remember_device,
        )
        .await
        .unwrap()
    }
}

pub fn registration(hardware_id: &str, fingerprint: &str) -> DeviceRegistration {
    DeviceRegistration {
        hardware_id: hardware_id.to_string(),
        fingerprint: fingerprint.to_string(),
        info: Default::default(),
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl TestResponse {
    /// Every `Set-Cookie` header, raw.
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(axum::http::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    /// Value of the cookie `name` set by this response.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let prefix = format!("{}=", name);
        self.set_cookies().into_iter().find_map(|c| {
            c.strip_prefix(&prefix)
                .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
        })
    }
}

pub async fn send(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
