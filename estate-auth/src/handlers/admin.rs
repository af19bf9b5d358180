//! Operator endpoints, guarded by `admin_auth_middleware`.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::admin::{DeviceRemovedResponse, RevokeAllResponse, WarmupRequest, WarmupResponse};
use crate::middleware::RequestCancel;
use crate::models::Device;
use crate::services::security_audit::{SecurityAuditLog, SecurityEventType, Severity};
use crate::services::CacheStats;
use crate::AppState;

/// GET /admin/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

/// POST /admin/cache/warmup
pub async fn warm_up_cache(
    State(state): State<AppState>,
    RequestCancel(cancel): RequestCancel,
    body: Bytes,
) -> Result<Json<WarmupResponse>, AppError> {
    let req: WarmupRequest = if body.is_empty() {
        WarmupRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidJson(e.to_string()))?
    };
    req.validate()?;

    let limit = req.limit.unwrap_or(state.config.cache.warmup_size);
    let loaded = state.tokens.warm_up(&cancel, limit).await?;
    Ok(Json(WarmupResponse {
        loaded,
        stats: state.cache.stats(),
    }))
}

/// POST /admin/principals/:principal_id/revoke-all
pub async fn revoke_all(
    State(state): State<AppState>,
    RequestCancel(cancel): RequestCancel,
    Path(principal_id): Path<Uuid>,
) -> Result<Json<RevokeAllResponse>, AppError> {
    let revoked = state.tokens.revoke_all(&cancel, principal_id).await?;
    Ok(Json(RevokeAllResponse {
        principal_id,
        revoked,
    }))
}

/// GET /admin/principals/:principal_id/devices
pub async fn list_devices(
    State(state): State<AppState>,
    RequestCancel(cancel): RequestCancel,
    Path(principal_id): Path<Uuid>,
) -> Result<Json<Vec<Device>>, AppError> {
    let devices = state.devices.list_devices(&cancel, principal_id).await?;
    Ok(Json(devices))
}

/// DELETE /admin/devices/:device_id
///
/// Unbinds the device. Credentials issued to it stay unrevoked and fail
/// validation with `device_mismatch` from here on.
pub async fn remove_device(
    State(state): State<AppState>,
    RequestCancel(cancel): RequestCancel,
    Path(device_id): Path<Uuid>,
) -> Result<Json<DeviceRemovedResponse>, AppError> {
    let device = state
        .devices
        .unbind(&cancel, device_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Device not found")))?;

    SecurityAuditLog::new(
        SecurityEventType::AdminAction,
        Severity::Info,
        Some(device.principal_id),
        "Device removed",
    )
    .with_device(device_id)
    .emit();

    Ok(Json(DeviceRemovedResponse {
        device_id,
        principal_id: device.principal_id,
    }))
}

/// POST /admin/devices/:device_id/reset-trust
pub async fn reset_device_trust(
    State(state): State<AppState>,
    RequestCancel(cancel): RequestCancel,
    Path(device_id): Path<Uuid>,
) -> Result<Json<Device>, AppError> {
    let device = state.devices.reset_trust(&cancel, device_id).await?;
    Ok(Json(device))
}
