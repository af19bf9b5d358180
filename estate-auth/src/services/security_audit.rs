//! Security audit events.
//!
//! Events are structured records written to the dedicated
//! `security_audit` tracing target at `warn`, so log pipelines can route
//! them separately from operational logs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::observability::SECURITY_AUDIT_TARGET;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// Presented fingerprint does not match the bound device
    FingerprintMismatch,
    /// Refresh token used after it was consumed
    RefreshReplay,
    /// Revoked token presented for validation
    RevokedTokenUsage,
    /// Storage access outside the resolved scope
    ScopeViolation,
    /// Too many devices or structurally invalid fingerprint
    DeviceRejected,
    /// Administrative revocation or device removal
    AdminAction,
    /// Admin endpoint called without a valid key
    UnauthorizedAdminAction,
    /// Cookie-authenticated write without a matching CSRF token
    CsrfRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAuditLog {
    pub id: Uuid,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub principal_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub jti: Option<Uuid>,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

impl SecurityAuditLog {
    pub fn new(
        event_type: SecurityEventType,
        severity: Severity,
        principal_id: Option<Uuid>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            severity,
            principal_id,
            device_id: None,
            jti: None,
            details: details.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_device(mut self, device_id: Uuid) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_jti(mut self, jti: Uuid) -> Self {
        self.jti = Some(jti);
        self
    }

    pub fn fingerprint_mismatch(principal_id: Uuid, device_id: Uuid) -> Self {
        Self::new(
            SecurityEventType::FingerprintMismatch,
            Severity::Critical,
            Some(principal_id),
            "Presented fingerprint does not match bound device; trust reset",
        )
        .with_device(device_id)
    }

    pub fn refresh_replay(principal_id: Uuid, jti: Uuid) -> Self {
        Self::new(
            SecurityEventType::RefreshReplay,
            Severity::Critical,
            Some(principal_id),
            "Consumed refresh token presented again",
        )
        .with_jti(jti)
    }

    pub fn revoked_token_usage(principal_id: Uuid, jti: Uuid) -> Self {
        Self::new(
            SecurityEventType::RevokedTokenUsage,
            Severity::Warning,
            Some(principal_id),
            "Revoked token presented",
        )
        .with_jti(jti)
    }

    pub fn scope_violation(principal_id: Uuid, details: impl Into<String>) -> Self {
        Self::new(
            SecurityEventType::ScopeViolation,
            Severity::Warning,
            Some(principal_id),
            details,
        )
    }

    /// Write the event to the audit target.
    pub fn emit(&self) {
        tracing::warn!(
            target: SECURITY_AUDIT_TARGET,
            audit_id = %self.id,
            event_type = ?self.event_type,
            severity = self.severity.as_str(),
            principal_id = ?self.principal_id,
            device_id = ?self.device_id,
            jti = ?self.jti,
            details = %self.details,
            "Security event"
        );
    }
}
