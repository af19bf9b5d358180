use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use super::cancel::RequestCancel;
use crate::config::CookieConfig;
use crate::models::SecurityContext;
use crate::services::security_audit::{SecurityAuditLog, SecurityEventType, Severity};
use crate::services::Claims;
use crate::AppState;

pub const FINGERPRINT_HEADER: &str = "x-device-fingerprint";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// How the access token reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carriage {
    Bearer,
    Cookie,
}

/// Authenticated caller, inserted into request extensions by
/// [`auth_middleware`].
#[derive(Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub security: SecurityContext,
    pub carriage: Carriage,
    token: String,
}

impl AuthContext {
    /// The raw token the caller presented.
    pub fn token(&self) -> &str {
        &self.token
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn fingerprint(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(FINGERPRINT_HEADER)
        .and_then(|value| value.to_str().ok())
}

fn is_state_changing(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Double-submit check for cookie-carried credentials: the `x-csrf-token`
/// header must equal the CSRF cookie.
pub fn verify_csrf(jar: &CookieJar, headers: &HeaderMap, cookies: &CookieConfig) -> Result<(), AppError> {
    let cookie = jar.get(&cookies.csrf_cookie).map(|c| c.value());
    let header = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());

    match (cookie, header) {
        (Some(cookie), Some(header))
            if !cookie.is_empty() && bool::from(cookie.as_bytes().ct_eq(header.as_bytes())) =>
        {
            Ok(())
        }
        _ => {
            SecurityAuditLog::new(
                SecurityEventType::CsrfRejected,
                Severity::Warning,
                None,
                "missing or mismatched anti-forgery token",
            )
            .emit();
            Err(AppError::AccessDenied {
                code: "csrf_rejected",
                message: "Missing or invalid CSRF token".to_string(),
            })
        }
    }
}

/// Require a valid access token, from the `Authorization` header or the
/// session cookie, and install the caller's security context.
pub async fn auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (token, carriage) = match bearer_token(req.headers()) {
        Some(token) => (token.to_string(), Carriage::Bearer),
        None => match jar.get(&state.config.cookie.access_cookie) {
            Some(cookie) if !cookie.value().is_empty() => {
                (cookie.value().to_string(), Carriage::Cookie)
            }
            _ => {
                return Err(AppError::Unauthenticated {
                    code: "missing_token",
                    message: "Missing bearer token or session cookie".to_string(),
                })
            }
        },
    };

    if carriage == Carriage::Cookie && is_state_changing(req.method()) {
        verify_csrf(&jar, req.headers(), &state.config.cookie)?;
    }

    let cancel = req
        .extensions()
        .get::<RequestCancel>()
        .map(|c| c.0.clone())
        .unwrap_or_default();

    let claims = state
        .tokens
        .validate(&cancel, &token, fingerprint(req.headers()))
        .await?;
    let security = state
        .propagator
        .build_context(&cancel, claims.sub, claims.role, claims.tenant_id)
        .await?;

    tracing::debug!(
        principal_id = %claims.sub,
        role = %claims.role,
        "Request authenticated"
    );
    req.extensions_mut().insert(AuthContext {
        claims,
        security,
        carriage,
        token,
    });

    Ok(next.run(req).await)
}

/// Extractor for handlers behind [`auth_middleware`].
pub struct CurrentPrincipal(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Auth context missing from request extensions"
                ))
            })
    }
}
