//! Device binding and trust.

use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::Validate;

use super::security_audit::{SecurityAuditLog, SecurityEventType, Severity};
use super::{AuthError, StoreCallPolicy};
use crate::config::DeviceConfig;
use crate::models::{Device, DeviceRegistration};
use crate::store::DeviceStore;

const MIN_FINGERPRINT_LEN: usize = 32;
const MAX_FINGERPRINT_LEN: usize = 1024;
const MIN_FINGERPRINT_PARTS: usize = 3;

const SUSPICIOUS_PATTERNS: &[&str] = &[
    "test",
    "dummy",
    "fake",
    "mock",
    "simulator",
    "000000",
    "111111",
    "123456",
    "abcdef",
];

/// Structural check of a client fingerprint.
///
/// Expected shape is `platform:model:identifier[:...]`, ASCII only.
pub fn validate_fingerprint(fingerprint: &str) -> Result<(), AuthError> {
    if !(MIN_FINGERPRINT_LEN..=MAX_FINGERPRINT_LEN).contains(&fingerprint.len()) {
        return Err(AuthError::InvalidDevice(format!(
            "fingerprint must be {}..={} characters",
            MIN_FINGERPRINT_LEN, MAX_FINGERPRINT_LEN
        )));
    }

    if !fingerprint.is_ascii() {
        return Err(AuthError::InvalidDevice(
            "fingerprint must be ASCII".to_string(),
        ));
    }

    let parts: Vec<&str> = fingerprint.split(':').collect();
    if parts.len() < MIN_FINGERPRINT_PARTS || parts.iter().take(MIN_FINGERPRINT_PARTS).any(|p| p.is_empty()) {
        return Err(AuthError::InvalidDevice(
            "fingerprint must have at least three non-empty components".to_string(),
        ));
    }

    let lower = fingerprint.to_ascii_lowercase();
    if SUSPICIOUS_PATTERNS.iter().any(|p| lower.contains(p)) || has_repeated_blocks(fingerprint) {
        return Err(AuthError::InvalidDevice(
            "fingerprint looks synthetic".to_string(),
        ));
    }

    Ok(())
}

// Any 4-character block occurring more than three times.
fn has_repeated_blocks(fingerprint: &str) -> bool {
    if fingerprint.len() < 8 {
        return false;
    }
    (0..fingerprint.len() - 7).any(|i| {
        let block = &fingerprint[i..i + 4];
        fingerprint.matches(block).count() > 3
    })
}

fn fingerprints_match(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

pub struct DeviceBindingService {
    devices: Arc<dyn DeviceStore>,
    policy: StoreCallPolicy,
    trust_threshold: u32,
    max_devices: usize,
}

impl DeviceBindingService {
    pub fn new(devices: Arc<dyn DeviceStore>, policy: StoreCallPolicy, config: &DeviceConfig) -> Self {
        Self {
            devices,
            policy,
            trust_threshold: config.trust_threshold.max(1),
            max_devices: config.max_devices_per_principal.max(1),
        }
    }

    /// Bind a device to `principal_id`, or confirm an existing binding.
    ///
    /// A known hardware id presenting a different fingerprint is a hard
    /// failure: trust is reset and nothing is re-bound.
    pub async fn bind(
        &self,
        cancel: &CancellationToken,
        principal_id: Uuid,
        registration: &DeviceRegistration,
    ) -> Result<Device, AuthError> {
        registration
            .validate()
            .map_err(|e| AuthError::InvalidDevice(e.to_string()))?;

        if let Err(e) = validate_fingerprint(&registration.fingerprint) {
            SecurityAuditLog::new(
                SecurityEventType::DeviceRejected,
                Severity::Warning,
                Some(principal_id),
                e.to_string(),
            )
            .emit();
            return Err(e);
        }

        let hardware_id = registration.hardware_id.as_str();
        let existing = self
            .policy
            .run(cancel, "device.find_by_hardware_id", || {
                self.devices.find_by_hardware_id(principal_id, hardware_id)
            })
            .await?;

        if let Some(device) = existing {
            if !fingerprints_match(&device.fingerprint, &registration.fingerprint) {
                self.record_mismatch(cancel, &device).await?;
                return Err(AuthError::DeviceMismatch);
            }

            let device_id = device.device_id;
            let info = &registration.info;
            let device = self
                .policy
                .run(cancel, "device.touch", || self.devices.touch(device_id, info))
                .await?
                .ok_or(AuthError::DeviceMismatch)?;
            tracing::debug!(device_id = %device.device_id, "Existing device binding confirmed");
            return Ok(device);
        }

        let bound = self
            .policy
            .run(cancel, "device.list_for_principal", || {
                self.devices.list_for_principal(principal_id)
            })
            .await?;
        if bound.len() >= self.max_devices {
            SecurityAuditLog::new(
                SecurityEventType::DeviceRejected,
                Severity::Warning,
                Some(principal_id),
                format!("device limit of {} reached", self.max_devices),
            )
            .emit();
            return Err(AuthError::InvalidDevice(format!(
                "maximum of {} devices per user reached",
                self.max_devices
            )));
        }

        let device = Device::new(principal_id, registration);
        self.policy
            .run_once(cancel, "device.insert", || self.devices.insert(&device))
            .await?;

        tracing::info!(
            principal_id = %principal_id,
            device_id = %device.device_id,
            "New device bound"
        );
        Ok(device)
    }

    /// Check that `device_id` is still bound to `principal_id` and that the
    /// presented fingerprint matches. Raises trust on success.
    ///
    /// Trust changes are single store operations. A success observed against
    /// a streak that a concurrent mismatch has since reset leaves trust alone.
    pub async fn verify(
        &self,
        cancel: &CancellationToken,
        principal_id: Uuid,
        device_id: Uuid,
        fingerprint: Option<&str>,
    ) -> Result<Device, AuthError> {
        let found = self
            .policy
            .run(cancel, "device.find", || self.devices.find(device_id))
            .await?;

        let device = match found {
            Some(device) if device.principal_id == principal_id => device,
            _ => {
                tracing::info!(device_id = %device_id, "Token bound to a device that is no longer registered");
                return Err(AuthError::DeviceMismatch);
            }
        };

        let Some(presented) = fingerprint else {
            return Err(AuthError::DeviceMismatch);
        };

        if !fingerprints_match(&device.fingerprint, presented) {
            self.record_mismatch(cancel, &device).await?;
            return Err(AuthError::DeviceMismatch);
        }

        let observed = device.validation_streak;
        let threshold = self.trust_threshold;
        let updated = self
            .policy
            .run(cancel, "device.record_success", || {
                self.devices.record_success(device_id, observed, threshold)
            })
            .await?;

        // Unbound between the read and the write.
        updated.ok_or(AuthError::DeviceMismatch)
    }

    async fn record_mismatch(&self, cancel: &CancellationToken, device: &Device) -> Result<(), AuthError> {
        SecurityAuditLog::fingerprint_mismatch(device.principal_id, device.device_id).emit();
        let device_id = device.device_id;
        self.policy
            .run(cancel, "device.reset_trust", || self.devices.reset_trust(device_id))
            .await?;
        Ok(())
    }

    /// Remove a binding. Tokens bound to it fail with `DeviceMismatch`.
    pub async fn unbind(&self, cancel: &CancellationToken, device_id: Uuid) -> Result<Option<Device>, AuthError> {
        let device = self
            .policy
            .run(cancel, "device.find", || self.devices.find(device_id))
            .await?;
        let Some(device) = device else {
            return Ok(None);
        };

        self.policy
            .run(cancel, "device.delete", || self.devices.delete(device_id))
            .await?;

        tracing::info!(
            principal_id = %device.principal_id,
            device_id = %device_id,
            "Device unbound"
        );
        Ok(Some(device))
    }

    pub async fn reset_trust(&self, cancel: &CancellationToken, device_id: Uuid) -> Result<Device, AuthError> {
        let device = self
            .policy
            .run(cancel, "device.reset_trust", || self.devices.reset_trust(device_id))
            .await?
            .ok_or_else(|| AuthError::InvalidDevice("device not found".to_string()))?;

        SecurityAuditLog::new(
            SecurityEventType::AdminAction,
            Severity::Info,
            Some(device.principal_id),
            "Device trust reset",
        )
        .with_device(device_id)
        .emit();
        Ok(device)
    }

    pub async fn list_devices(&self, cancel: &CancellationToken, principal_id: Uuid) -> Result<Vec<Device>, AuthError> {
        self.policy
            .run(cancel, "device.list_for_principal", || {
                self.devices.list_for_principal(principal_id)
            })
            .await
    }
}
