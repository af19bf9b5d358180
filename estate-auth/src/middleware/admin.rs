use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use crate::services::security_audit::{SecurityAuditLog, SecurityEventType, Severity};
use crate::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

/// Guard operator endpoints with the shared admin API key.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    let expected = state.config.security.admin_api_key.expose_secret();

    match presented {
        Some(key) if bool::from(key.as_bytes().ct_eq(expected.as_bytes())) => {
            Ok(next.run(request).await)
        }
        _ => {
            SecurityAuditLog::new(
                SecurityEventType::UnauthorizedAdminAction,
                Severity::Warning,
                None,
                format!("{} {}", request.method(), request.uri().path()),
            )
            .emit();
            Err(AppError::Unauthenticated {
                code: "invalid_admin_key",
                message: "Invalid or missing admin API key".to_string(),
            })
        }
    }
}
