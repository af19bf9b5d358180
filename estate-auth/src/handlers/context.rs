//! Endpoints describing what the authenticated caller may see and do.

use axum::{extract::Path, Json};
use service_core::error::AppError;

use crate::dtos::auth::{ManageableRolesResponse, RoleAccessResponse, ScopeResponse};
use crate::middleware::CurrentPrincipal;
use crate::models::Role;
use crate::services::RoleResolver;

/// GET /auth/scope
pub async fn scope(CurrentPrincipal(auth): CurrentPrincipal) -> Json<ScopeResponse> {
    let permissions = RoleResolver::permissions(auth.security.role);
    Json(ScopeResponse::new(auth.security, permissions))
}

/// GET /auth/roles/manageable
pub async fn manageable_roles(
    CurrentPrincipal(auth): CurrentPrincipal,
) -> Json<ManageableRolesResponse> {
    let role = auth.security.role;
    Json(ManageableRolesResponse {
        role,
        manageable: RoleResolver::manageable_roles(role),
        assignable: RoleResolver::assignable_roles(role),
    })
}

/// GET /auth/roles/:role/access
pub async fn role_access(
    CurrentPrincipal(auth): CurrentPrincipal,
    Path(target): Path<String>,
) -> Result<Json<RoleAccessResponse>, AppError> {
    let target: Role = target
        .parse()
        .map_err(|e: String| AppError::BadRequest(anyhow::anyhow!(e)))?;
    let requester = auth.security.role;
    Ok(Json(RoleAccessResponse {
        requester,
        target,
        access: RoleResolver::check_access(requester, target),
    }))
}
