use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AssignmentStore, CredentialStore, DeviceStore, PrincipalStore, StoreError};
use crate::models::{
    Assignment, CredentialRecord, Device, DeviceInfo, DivisionRef, EstateRef, Principal,
    TrustLevel,
};

/// In-memory implementation of every store trait.
///
/// Supports fault injection (`fail_next`, `set_latency`) so tests can
/// exercise retry, timeout and cancellation paths.
#[derive(Default)]
pub struct MemoryStore {
    credentials: DashMap<Uuid, CredentialRecord>,
    devices: DashMap<Uuid, Device>,
    principals: DashMap<Uuid, Principal>,
    assignments: DashMap<Uuid, Assignment>,
    estates: DashMap<Uuid, EstateRef>,
    divisions: DashMap<Uuid, DivisionRef>,
    // Serializes refresh rotation against revoke-all for one principal.
    principal_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    pending_failures: AtomicU32,
    latency_ms: AtomicU64,
    calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with `StoreError::Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Total calls made against the store, failed ones included.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn add_estate(&self, estate_id: Uuid, tenant_id: Uuid) {
        self.estates.insert(
            estate_id,
            EstateRef {
                estate_id,
                tenant_id,
            },
        );
    }

    pub fn add_division(&self, division_id: Uuid, estate_id: Uuid) {
        self.divisions.insert(
            division_id,
            DivisionRef {
                division_id,
                estate_id,
            },
        );
    }

    /// Flip a principal's active flag. Returns whether the principal exists.
    pub fn set_principal_active(&self, principal_id: Uuid, active: bool) -> bool {
        match self.principals.get_mut(&principal_id) {
            Some(mut principal) => {
                principal.is_active = active;
                principal.updated_utc = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    async fn simulate(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let failed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn principal_lock(&self, principal_id: Uuid) -> Arc<Mutex<()>> {
        self.principal_locks.entry(principal_id).or_default().clone()
    }

    fn revoke_matching<F>(&self, predicate: F) -> Vec<CredentialRecord>
    where
        F: Fn(&CredentialRecord) -> bool,
    {
        let now = Utc::now();
        let mut revoked = Vec::new();
        for mut entry in self.credentials.iter_mut() {
            if entry.revoked_at.is_none() && predicate(&entry) {
                entry.revoked_at = Some(now);
                revoked.push(entry.clone());
            }
        }
        revoked
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_bundle(&self, records: &[CredentialRecord]) -> Result<(), StoreError> {
        self.simulate().await?;
        if records
            .iter()
            .any(|r| self.credentials.contains_key(&r.jti))
        {
            return Err(StoreError::Conflict("duplicate credential id".to_string()));
        }
        for record in records {
            self.credentials.insert(record.jti, record.clone());
        }
        Ok(())
    }

    async fn find(&self, jti: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        self.simulate().await?;
        Ok(self.credentials.get(&jti).map(|r| r.clone()))
    }

    async fn rotate_refresh(
        &self,
        consumed_jti: Uuid,
        replacements: &[CredentialRecord],
    ) -> Result<bool, StoreError> {
        self.simulate().await?;

        let Some(principal_id) = self.credentials.get(&consumed_jti).map(|r| r.principal_id) else {
            return Ok(false);
        };
        let lock = self.principal_lock(principal_id);
        let _serial = lock.lock().await;

        // The shard write lock makes the test-and-set atomic. It is released
        // before the inserts, which may land in the same shard.
        let claimed = match self.credentials.get_mut(&consumed_jti) {
            Some(mut record) if record.consumed_at.is_none() && record.revoked_at.is_none() => {
                record.consumed_at = Some(Utc::now());
                true
            }
            _ => false,
        };

        if claimed {
            for record in replacements {
                self.credentials.insert(record.jti, record.clone());
            }
        }
        Ok(claimed)
    }

    async fn revoke(&self, jti: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        self.simulate().await?;
        Ok(self.credentials.get_mut(&jti).and_then(|mut record| {
            if record.revoked_at.is_some() {
                return None;
            }
            record.revoked_at = Some(Utc::now());
            Some(record.clone())
        }))
    }

    async fn revoke_all_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        self.simulate().await?;
        let lock = self.principal_lock(principal_id);
        let _serial = lock.lock().await;
        Ok(self.revoke_matching(|r| r.principal_id == principal_id))
    }

    async fn revoke_for_device(
        &self,
        principal_id: Uuid,
        device_id: Uuid,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        self.simulate().await?;
        Ok(self.revoke_matching(|r| {
            r.principal_id == principal_id && r.device_id == Some(device_id)
        }))
    }

    async fn recent_active(&self, limit: usize) -> Result<Vec<CredentialRecord>, StoreError> {
        self.simulate().await?;
        let mut active: Vec<CredentialRecord> = self
            .credentials
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.clone())
            .collect();
        active.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        active.truncate(limit);
        Ok(active)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.simulate().await
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn find(&self, device_id: Uuid) -> Result<Option<Device>, StoreError> {
        self.simulate().await?;
        Ok(self.devices.get(&device_id).map(|d| d.clone()))
    }

    async fn find_by_hardware_id(
        &self,
        principal_id: Uuid,
        hardware_id: &str,
    ) -> Result<Option<Device>, StoreError> {
        self.simulate().await?;
        Ok(self
            .devices
            .iter()
            .find(|d| d.principal_id == principal_id && d.hardware_id == hardware_id)
            .map(|d| d.clone()))
    }

    async fn list_for_principal(&self, principal_id: Uuid) -> Result<Vec<Device>, StoreError> {
        self.simulate().await?;
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| d.principal_id == principal_id)
            .map(|d| d.clone())
            .collect();
        devices.sort_by(|a, b| a.created_utc.cmp(&b.created_utc));
        Ok(devices)
    }

    async fn insert(&self, device: &Device) -> Result<(), StoreError> {
        self.simulate().await?;
        let duplicate = self.devices.iter().any(|d| {
            d.device_id == device.device_id
                || (d.principal_id == device.principal_id && d.hardware_id == device.hardware_id)
        });
        if duplicate {
            return Err(StoreError::Conflict("device already bound".to_string()));
        }
        self.devices.insert(device.device_id, device.clone());
        Ok(())
    }

    // Each mutation runs under the shard write lock of its entry.
    async fn record_success(
        &self,
        device_id: Uuid,
        observed_streak: u32,
        trust_threshold: u32,
    ) -> Result<Option<Device>, StoreError> {
        self.simulate().await?;
        Ok(self.devices.get_mut(&device_id).map(|mut device| {
            if device.validation_streak == observed_streak {
                device.validation_streak = observed_streak.saturating_add(1);
                device.trust_level = device
                    .trust_level
                    .after_success(device.validation_streak, trust_threshold);
                device.last_seen_utc = Utc::now();
            }
            device.clone()
        }))
    }

    async fn reset_trust(&self, device_id: Uuid) -> Result<Option<Device>, StoreError> {
        self.simulate().await?;
        Ok(self.devices.get_mut(&device_id).map(|mut device| {
            device.trust_level = TrustLevel::Untrusted;
            device.validation_streak = 0;
            device.clone()
        }))
    }

    async fn touch(&self, device_id: Uuid, info: &DeviceInfo) -> Result<Option<Device>, StoreError> {
        self.simulate().await?;
        Ok(self.devices.get_mut(&device_id).map(|mut device| {
            device.info = info.clone();
            device.last_seen_utc = Utc::now();
            device.clone()
        }))
    }

    async fn delete(&self, device_id: Uuid) -> Result<bool, StoreError> {
        self.simulate().await?;
        Ok(self.devices.remove(&device_id).is_some())
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn find(&self, principal_id: Uuid) -> Result<Option<Principal>, StoreError> {
        self.simulate().await?;
        Ok(self.principals.get(&principal_id).map(|p| p.clone()))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        self.simulate().await?;
        Ok(self
            .principals
            .iter()
            .find(|p| p.username.eq_ignore_ascii_case(username))
            .map(|p| p.clone()))
    }

    async fn insert(&self, principal: &Principal) -> Result<(), StoreError> {
        self.simulate().await?;
        if self
            .principals
            .iter()
            .any(|p| p.username.eq_ignore_ascii_case(&principal.username))
        {
            return Err(StoreError::Conflict("username taken".to_string()));
        }
        self.principals
            .insert(principal.principal_id, principal.clone());
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn active_assignments(&self, principal_id: Uuid) -> Result<Vec<Assignment>, StoreError> {
        self.simulate().await?;
        Ok(self
            .assignments
            .iter()
            .filter(|a| a.principal_id == principal_id && a.is_active)
            .map(|a| a.clone())
            .collect())
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<(), StoreError> {
        self.simulate().await?;
        self.assignments
            .insert(assignment.assignment_id, assignment.clone());
        Ok(())
    }

    async fn estates_in_tenants(&self, tenant_ids: &[Uuid]) -> Result<Vec<EstateRef>, StoreError> {
        self.simulate().await?;
        Ok(self
            .estates
            .iter()
            .filter(|e| tenant_ids.contains(&e.tenant_id))
            .map(|e| *e)
            .collect())
    }

    async fn divisions_in_estates(
        &self,
        estate_ids: &[Uuid],
    ) -> Result<Vec<DivisionRef>, StoreError> {
        self.simulate().await?;
        Ok(self
            .divisions
            .iter()
            .filter(|d| estate_ids.contains(&d.estate_id))
            .map(|d| *d)
            .collect())
    }

    async fn estates_by_id(&self, estate_ids: &[Uuid]) -> Result<Vec<EstateRef>, StoreError> {
        self.simulate().await?;
        Ok(estate_ids
            .iter()
            .filter_map(|id| self.estates.get(id).map(|e| *e))
            .collect())
    }

    async fn divisions_by_id(&self, division_ids: &[Uuid]) -> Result<Vec<DivisionRef>, StoreError> {
        self.simulate().await?;
        Ok(division_ids
            .iter()
            .filter_map(|id| self.divisions.get(id).map(|d| *d))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenType;
    use chrono::Duration as ChronoDuration;

    fn refresh_record(principal_id: Uuid) -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord::new(
            Uuid::new_v4(),
            principal_id,
            None,
            TokenType::Refresh,
            &Uuid::new_v4().to_string(),
            now,
            now + ChronoDuration::days(7),
        )
    }

    #[tokio::test]
    async fn test_rotate_refresh_only_once() {
        let store = MemoryStore::new();
        let principal = Uuid::new_v4();
        let old = refresh_record(principal);
        store.insert_bundle(&[old.clone()]).await.unwrap();

        let first = refresh_record(principal);
        let second = refresh_record(principal);
        assert!(store.rotate_refresh(old.jti, &[first.clone()]).await.unwrap());
        assert!(!store.rotate_refresh(old.jti, &[second.clone()]).await.unwrap());

        assert!(CredentialStore::find(&store, first.jti).await.unwrap().is_some());
        assert!(CredentialStore::find(&store, second.jti).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_returns_changed_records() {
        let store = MemoryStore::new();
        let principal = Uuid::new_v4();
        let a = refresh_record(principal);
        let b = refresh_record(principal);
        let other = refresh_record(Uuid::new_v4());
        store
            .insert_bundle(&[a.clone(), b.clone(), other.clone()])
            .await
            .unwrap();

        assert!(store.revoke(a.jti).await.unwrap().is_some());
        let revoked = store.revoke_all_for_principal(principal).await.unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].jti, b.jti);

        let untouched = CredentialStore::find(&store, other.jti).await.unwrap().unwrap();
        assert!(untouched.revoked_at.is_none());
    }

    fn device(principal_id: Uuid) -> Device {
        Device::new(
            principal_id,
            &crate::models::DeviceRegistration {
                hardware_id: "hw-1".to_string(),
                fingerprint: "android:pixel-7:8f3a9c2e5b7d4f1a9e6c3b8d2a5f7e1c".to_string(),
                info: DeviceInfo::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_record_success_ignores_stale_streak() {
        let store = MemoryStore::new();
        let bound = device(Uuid::new_v4());
        DeviceStore::insert(&store, &bound).await.unwrap();

        let known = store.record_success(bound.device_id, 0, 3).await.unwrap().unwrap();
        assert_eq!(known.validation_streak, 1);
        assert_eq!(known.trust_level, TrustLevel::Known);

        // A reset landed after the caller read streak 1.
        store.reset_trust(bound.device_id).await.unwrap();
        let after = store.record_success(bound.device_id, 1, 3).await.unwrap().unwrap();
        assert_eq!(after.validation_streak, 0);
        assert_eq!(after.trust_level, TrustLevel::Untrusted);
    }

    #[tokio::test]
    async fn test_device_mutations_on_missing_row() {
        let store = MemoryStore::new();
        let gone = Uuid::new_v4();
        assert!(store.record_success(gone, 0, 3).await.unwrap().is_none());
        assert!(store.reset_trust(gone).await.unwrap().is_none());
        assert!(store.touch(gone, &DeviceInfo::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_covers_rotated_records() {
        let store = MemoryStore::new();
        let principal = Uuid::new_v4();
        let old = refresh_record(principal);
        store.insert_bundle(&[old.clone()]).await.unwrap();

        let next = refresh_record(principal);
        assert!(store.rotate_refresh(old.jti, &[next.clone()]).await.unwrap());
        let revoked = store.revoke_all_for_principal(principal).await.unwrap();
        assert!(revoked.iter().any(|r| r.jti == next.jti));

        // Once revoked, the rotated token cannot rotate again.
        assert!(!store.rotate_refresh(next.jti, &[refresh_record(principal)]).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next(2);
        assert!(matches!(
            store.health_check().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.health_check().await.is_err());
        assert!(store.health_check().await.is_ok());
        assert_eq!(store.call_count(), 3);
    }
}
