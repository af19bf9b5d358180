use service_core::error::AppError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown user, wrong password and inactive principal all look the same.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Token malformed")]
    TokenMalformed,

    #[error("Device mismatch")]
    DeviceMismatch,

    #[error("Insufficient permission: {0}")]
    InsufficientPermission(String),

    #[error("Scope violation: {0}")]
    ScopeViolation(String),

    #[error("Refresh token replayed")]
    RefreshReplay,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Device registration required for mobile login")]
    DeviceRequired,

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenRevoked => "token_revoked",
            AuthError::TokenMalformed => "token_malformed",
            AuthError::DeviceMismatch => "device_mismatch",
            AuthError::InsufficientPermission(_) => "insufficient_permission",
            AuthError::ScopeViolation(_) => "scope_violation",
            AuthError::RefreshReplay => "refresh_replay",
            AuthError::InvalidRefreshToken => "invalid_refresh_token",
            AuthError::DeviceRequired => "device_required",
            AuthError::InvalidDevice(_) => "invalid_device",
            AuthError::ServiceUnavailable(_) => "service_unavailable",
            AuthError::Cancelled => "cancelled",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Terminal for the request: the caller must re-authenticate.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::TokenExpired
                | AuthError::TokenRevoked
                | AuthError::TokenMalformed
                | AuthError::DeviceMismatch
                | AuthError::RefreshReplay
                | AuthError::InvalidRefreshToken
        )
    }

    /// The caller is known but not allowed.
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InsufficientPermission(_) | AuthError::ScopeViolation(_)
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                AuthError::ServiceUnavailable(err.to_string())
            }
            StoreError::Conflict(msg) => AuthError::Internal(anyhow::anyhow!("conflict: {}", msg)),
            StoreError::Backend(e) => AuthError::Internal(e),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let code = err.code();
        if err.is_authentication_failure() {
            return AppError::Unauthenticated {
                code,
                message: err.to_string(),
            };
        }
        if err.is_authorization_failure() {
            return AppError::AccessDenied {
                code,
                message: err.to_string(),
            };
        }
        match err {
            AuthError::DeviceRequired | AuthError::InvalidDevice(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            AuthError::ServiceUnavailable(msg) => {
                tracing::warn!(reason = %msg, "Store unavailable, request denied");
                AppError::ServiceUnavailable
            }
            AuthError::Cancelled => AppError::ServiceUnavailable,
            AuthError::Internal(e) => AppError::InternalError(e),
            other => AppError::InternalError(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::time::Duration;

    #[test]
    fn test_authentication_and_authorization_are_distinct() {
        assert!(AuthError::DeviceMismatch.is_authentication_failure());
        assert!(!AuthError::DeviceMismatch.is_authorization_failure());
        assert!(AuthError::ScopeViolation("x".into()).is_authorization_failure());
        assert!(!AuthError::ScopeViolation("x".into()).is_authentication_failure());
    }

    #[test]
    fn test_status_mapping() {
        let app: AppError = AuthError::TokenRevoked.into();
        assert_eq!(app.status_code(), StatusCode::UNAUTHORIZED);

        let app: AppError = AuthError::InsufficientPermission("users:manage".into()).into();
        assert_eq!(app.status_code(), StatusCode::FORBIDDEN);

        let app: AppError = AuthError::from(StoreError::Timeout(Duration::from_millis(5))).into();
        assert_eq!(app.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_device_mismatch_keeps_its_code() {
        match AppError::from(AuthError::DeviceMismatch) {
            AppError::Unauthenticated { code, message } => {
                assert_eq!(code, "device_mismatch");
                assert_eq!(message, "Device mismatch");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }
    }
}
