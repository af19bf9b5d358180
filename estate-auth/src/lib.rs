pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    request_id::{request_id_middleware, REQUEST_ID_HEADER},
    security_headers::security_headers_middleware,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AuthConfig;
use crate::middleware::{ADMIN_KEY_HEADER, CSRF_HEADER, FINGERPRINT_HEADER};
use crate::services::{
    AuthService, DeviceBindingService, JwtService, SecurityContextPropagator, SessionCache,
    StoreCallPolicy, TokenService,
};
use crate::store::{AssignmentStore, CredentialStore, DeviceStore, MemoryStore, PgStore, PrincipalStore};

/// Backing stores, one trait object per concern.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub principals: Arc<dyn PrincipalStore>,
    pub assignments: Arc<dyn AssignmentStore>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            credentials: store.clone(),
            devices: store.clone(),
            principals: store.clone(),
            assignments: store,
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self {
            credentials: store.clone(),
            devices: store.clone(),
            principals: store.clone(),
            assignments: store,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub auth: Arc<AuthService>,
    pub tokens: Arc<TokenService>,
    pub devices: Arc<DeviceBindingService>,
    pub propagator: Arc<SecurityContextPropagator>,
    pub cache: Arc<SessionCache>,
    pub stores: Stores,
    pub login_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire every service over `stores`. Each state gets its own session
    /// cache.
    pub fn new(config: AuthConfig, stores: Stores) -> Self {
        let policy = StoreCallPolicy::from_config(&config.store);
        let cache = Arc::new(SessionCache::from_config(&config.cache));
        let jwt = Arc::new(JwtService::new(&config.jwt));
        let devices = Arc::new(DeviceBindingService::new(
            stores.devices.clone(),
            policy.clone(),
            &config.device,
        ));
        let propagator = Arc::new(SecurityContextPropagator::new(
            stores.assignments.clone(),
            policy.clone(),
        ));
        let tokens = Arc::new(TokenService::new(
            jwt,
            stores.credentials.clone(),
            stores.principals.clone(),
            cache.clone(),
            devices.clone(),
            propagator.clone(),
            policy.clone(),
        ));
        let auth = Arc::new(AuthService::new(
            stores.principals.clone(),
            devices.clone(),
            tokens.clone(),
            policy,
        ));
        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );

        Self {
            config: Arc::new(config),
            auth,
            tokens,
            devices,
            propagator,
            cache,
            stores,
            login_rate_limiter,
        }
    }

    /// Fully in-memory state for development and tests.
    pub fn in_memory(config: AuthConfig, store: Arc<MemoryStore>) -> Self {
        Self::new(config, Stores::memory(store))
    }
}

fn cors_layer(config: &AuthConfig) -> Result<CorsLayer, AppError> {
    let origins = config
        .security
        .allowed_origins
        .iter()
        .map(|origin| {
            origin.parse::<HeaderValue>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", origin, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(CSRF_HEADER),
            HeaderName::from_static(FINGERPRINT_HEADER),
            HeaderName::from_static(ADMIN_KEY_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]))
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let admin_routes = Router::new()
        .route("/admin/cache/stats", get(handlers::admin::cache_stats))
        .route("/admin/cache/warmup", post(handlers::admin::warm_up_cache))
        .route(
            "/admin/principals/:principal_id/revoke-all",
            post(handlers::admin::revoke_all),
        )
        .route(
            "/admin/principals/:principal_id/devices",
            get(handlers::admin::list_devices),
        )
        .route(
            "/admin/devices/:device_id",
            delete(handlers::admin::remove_device),
        )
        .route(
            "/admin/devices/:device_id/reset-trust",
            post(handlers::admin::reset_device_trust),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    let login_route = Router::new()
        .route("/auth/login", post(handlers::session::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let authenticated = Router::new()
        .route("/auth/logout", post(handlers::session::logout))
        .route("/auth/scope", get(handlers::context::scope))
        .route(
            "/auth/roles/manageable",
            get(handlers::context::manageable_roles),
        )
        .route(
            "/auth/roles/:role/access",
            get(handlers::context::role_access),
        )
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let cors = cors_layer(&state.config)?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/auth/refresh", post(handlers::session::refresh))
        .route("/auth/introspect", post(handlers::session::introspect))
        .merge(login_route)
        .merge(authenticated)
        .merge(admin_routes)
        .with_state(state)
        .layer(from_fn(middleware::cancellation_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors);

    Ok(app)
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let cancel = CancellationToken::new();
    StoreCallPolicy::from_config(&state.config.store)
        .run_once(&cancel, "credentials.health_check", || {
            state.stores.credentials.health_check()
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Credential store health check failed");
            AppError::ServiceUnavailable
        })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "cache": state.cache.stats(),
    })))
}
