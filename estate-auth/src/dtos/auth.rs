use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{Device, DeviceRegistration, Platform, Principal, Role, Scope, SecurityContext};
use crate::services::{AccessCheck, Claims};

fn default_platform() -> Platform {
    Platform::Web
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, max = 256, message = "Password is required"))]
    pub password: String,

    #[serde(default = "default_platform")]
    pub platform: Platform,

    #[validate(nested)]
    pub device: Option<DeviceRegistration>,

    #[serde(default)]
    pub remember_device: bool,
}

#[derive(Debug, Serialize)]
pub struct PrincipalSummary {
    pub principal_id: Uuid,
    pub username: String,
    pub role: Role,
    pub tenant_id: Option<Uuid>,
}

impl From<&Principal> for PrincipalSummary {
    fn from(principal: &Principal) -> Self {
        Self {
            principal_id: principal.principal_id,
            username: principal.username.clone(),
            role: principal.role,
            tenant_id: principal.tenant_id,
        }
    }
}

/// Tokens handed to the client.
///
/// Browser logins carry the tokens in HTTP-only cookies, so the token
/// fields stay empty and only the anti-forgery token is returned.
#[derive(Debug, Default, Serialize)]
pub struct TokenResponse {
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub principal: PrincipalSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(flatten)]
    pub tokens: TokenResponse,
}

/// Refresh token in the body for mobile clients; browsers send the cookie.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, max = 4096))]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct LogoutRequest {
    #[validate(length(min = 1, max = 4096))]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IntrospectRequest {
    #[validate(length(min = 1, max = 4096, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
}

#[derive(Debug, Serialize)]
pub struct ScopeResponse {
    pub principal_id: Uuid,
    pub role: Role,
    pub tenant_id: Option<Uuid>,
    pub permissions: Vec<String>,
    pub scope: Scope,
}

impl ScopeResponse {
    pub fn new(ctx: SecurityContext, permissions: Vec<String>) -> Self {
        Self {
            principal_id: ctx.principal_id,
            role: ctx.role,
            tenant_id: ctx.tenant_id,
            permissions,
            scope: ctx.scope,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ManageableRolesResponse {
    pub role: Role,
    pub manageable: Vec<Role>,
    pub assignable: Vec<Role>,
}

#[derive(Debug, Serialize)]
pub struct RoleAccessResponse {
    pub requester: Role,
    pub target: Role,
    #[serde(flatten)]
    pub access: AccessCheck,
}
