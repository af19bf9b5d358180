//! Durable stores behind the authentication core.
//!
//! Every store is a trait object so the service layer runs unchanged on
//! PostgreSQL in production and on [`MemoryStore`] in tests and local dev.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use service_core::retry::Transient;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Assignment, CredentialRecord, Device, DeviceInfo, DivisionRef, EstateRef, Principal,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other => StoreError::Backend(anyhow::Error::new(other)),
        }
    }
}

/// Issued credentials and their revocation state. The source of truth for
/// revocation; the session cache only mirrors it.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert every record of one issuance, all or nothing.
    async fn insert_bundle(&self, records: &[CredentialRecord]) -> Result<(), StoreError>;

    async fn find(&self, jti: Uuid) -> Result<Option<CredentialRecord>, StoreError>;

    /// Mark `consumed_jti` consumed and insert `replacements`, atomically.
    /// Returns `false` without inserting anything when the refresh token was
    /// already consumed or revoked.
    async fn rotate_refresh(
        &self,
        consumed_jti: Uuid,
        replacements: &[CredentialRecord],
    ) -> Result<bool, StoreError>;

    /// Revoke one credential. Returns the record when it was newly revoked.
    async fn revoke(&self, jti: Uuid) -> Result<Option<CredentialRecord>, StoreError>;

    /// Revoke every live credential of a principal, returning what changed.
    async fn revoke_all_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<CredentialRecord>, StoreError>;

    async fn revoke_for_device(
        &self,
        principal_id: Uuid,
        device_id: Uuid,
    ) -> Result<Vec<CredentialRecord>, StoreError>;

    /// Most recently issued active credentials, newest first.
    async fn recent_active(&self, limit: usize) -> Result<Vec<CredentialRecord>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn find(&self, device_id: Uuid) -> Result<Option<Device>, StoreError>;

    async fn find_by_hardware_id(
        &self,
        principal_id: Uuid,
        hardware_id: &str,
    ) -> Result<Option<Device>, StoreError>;

    async fn list_for_principal(&self, principal_id: Uuid) -> Result<Vec<Device>, StoreError>;

    async fn insert(&self, device: &Device) -> Result<(), StoreError>;

    /// Atomically count one successful validation and raise trust, but only
    /// while the streak still equals `observed_streak`. Otherwise the row is
    /// left as is. Returns the row as stored, `None` if it is gone.
    async fn record_success(
        &self,
        device_id: Uuid,
        observed_streak: u32,
        trust_threshold: u32,
    ) -> Result<Option<Device>, StoreError>;

    /// Atomically drop trust to untrusted and clear the streak.
    async fn reset_trust(&self, device_id: Uuid) -> Result<Option<Device>, StoreError>;

    /// Refresh client metadata and last-seen without touching trust.
    async fn touch(&self, device_id: Uuid, info: &DeviceInfo) -> Result<Option<Device>, StoreError>;

    async fn delete(&self, device_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find(&self, principal_id: Uuid) -> Result<Option<Principal>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError>;

    async fn insert(&self, principal: &Principal) -> Result<(), StoreError>;
}

/// Scope assignments plus the read-only organisational hierarchy needed to
/// materialize them.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn active_assignments(&self, principal_id: Uuid) -> Result<Vec<Assignment>, StoreError>;

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<(), StoreError>;

    async fn estates_in_tenants(&self, tenant_ids: &[Uuid]) -> Result<Vec<EstateRef>, StoreError>;

    async fn divisions_in_estates(
        &self,
        estate_ids: &[Uuid],
    ) -> Result<Vec<DivisionRef>, StoreError>;

    async fn estates_by_id(&self, estate_ids: &[Uuid]) -> Result<Vec<EstateRef>, StoreError>;

    async fn divisions_by_id(&self, division_ids: &[Uuid]) -> Result<Vec<DivisionRef>, StoreError>;
}
