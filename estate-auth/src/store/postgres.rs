//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::FromRow;
use uuid::Uuid;

use super::{AssignmentStore, CredentialStore, DeviceStore, PrincipalStore, StoreError};
use crate::models::{
    Assignment, CredentialRecord, Device, DeviceInfo, DivisionRef, EstateRef, Principal,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_column<T>(value: &str, column: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| StoreError::Backend(anyhow::anyhow!("column {}: {}", column, e)))
}

#[derive(FromRow)]
struct CredentialRow {
    jti: Uuid,
    principal_id: Uuid,
    device_id: Option<Uuid>,
    token_type: String,
    token_hash: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    consumed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CredentialRow> for CredentialRecord {
    type Error = StoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Self {
            jti: row.jti,
            principal_id: row.principal_id,
            device_id: row.device_id,
            token_type: parse_column(&row.token_type, "token_type")?,
            token_hash: row.token_hash,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            consumed_at: row.consumed_at,
        })
    }
}

#[derive(FromRow)]
struct DeviceRow {
    device_id: Uuid,
    principal_id: Uuid,
    hardware_id: String,
    fingerprint: String,
    trust_level: String,
    validation_streak: i32,
    device_name: Option<String>,
    os: Option<String>,
    app_version: Option<String>,
    created_utc: DateTime<Utc>,
    last_seen_utc: DateTime<Utc>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = StoreError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            device_id: row.device_id,
            principal_id: row.principal_id,
            hardware_id: row.hardware_id,
            fingerprint: row.fingerprint,
            trust_level: parse_column(&row.trust_level, "trust_level")?,
            validation_streak: u32::try_from(row.validation_streak).unwrap_or(0),
            info: DeviceInfo {
                device_name: row.device_name,
                os: row.os,
                app_version: row.app_version,
            },
            created_utc: row.created_utc,
            last_seen_utc: row.last_seen_utc,
        })
    }
}

#[derive(FromRow)]
struct PrincipalRow {
    principal_id: Uuid,
    username: String,
    password_hash: String,
    role: String,
    tenant_id: Option<Uuid>,
    is_active: bool,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = StoreError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        Ok(Self {
            principal_id: row.principal_id,
            username: row.username,
            password_hash: row.password_hash,
            role: parse_column(&row.role, "role")?,
            tenant_id: row.tenant_id,
            is_active: row.is_active,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct AssignmentRow {
    assignment_id: Uuid,
    principal_id: Uuid,
    scope_level: String,
    entity_id: Uuid,
    is_active: bool,
    created_utc: DateTime<Utc>,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = StoreError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            assignment_id: row.assignment_id,
            principal_id: row.principal_id,
            level: parse_column(&row.scope_level, "scope_level")?,
            entity_id: row.entity_id,
            is_active: row.is_active,
            created_utc: row.created_utc,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

async fn insert_credentials(
    conn: &mut PgConnection,
    records: &[CredentialRecord],
) -> Result<(), StoreError> {
    for record in records {
        sqlx::query(
            r#"
            INSERT INTO credentials (jti, principal_id, device_id, token_type, token_hash, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.jti)
        .bind(record.principal_id)
        .bind(record.device_id)
        .bind(record.token_type.as_str())
        .bind(&record.token_hash)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Row lock on the principal. Refresh rotation and revoke-all both take it,
/// so a rotation either commits before a revoke-all starts or sees its
/// refresh token revoked.
async fn lock_principal(conn: &mut PgConnection, principal_id: Uuid) -> Result<(), StoreError> {
    sqlx::query("SELECT principal_id FROM principals WHERE principal_id = $1 FOR UPDATE")
        .bind(principal_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn insert_bundle(&self, records: &[CredentialRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_credentials(&mut tx, records).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, jti: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE jti = $1")
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?
            .map(CredentialRecord::try_from)
            .transpose()
    }

    async fn rotate_refresh(
        &self,
        consumed_jti: Uuid,
        replacements: &[CredentialRecord],
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let owner: Option<Uuid> =
            sqlx::query_scalar("SELECT principal_id FROM credentials WHERE jti = $1")
                .bind(consumed_jti)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(principal_id) = owner else {
            tx.rollback().await?;
            return Ok(false);
        };
        lock_principal(&mut tx, principal_id).await?;

        let claimed = sqlx::query(
            r#"
            UPDATE credentials SET consumed_at = now()
            WHERE jti = $1 AND token_type = 'refresh' AND consumed_at IS NULL AND revoked_at IS NULL
            "#,
        )
        .bind(consumed_jti)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_credentials(&mut tx, replacements).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn revoke(&self, jti: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        sqlx::query_as::<_, CredentialRow>(
            "UPDATE credentials SET revoked_at = now() WHERE jti = $1 AND revoked_at IS NULL RETURNING *",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?
        .map(CredentialRecord::try_from)
        .transpose()
    }

    async fn revoke_all_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_principal(&mut tx, principal_id).await?;

        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            UPDATE credentials SET revoked_at = now()
            WHERE principal_id = $1 AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(principal_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        convert_all(rows)
    }

    async fn revoke_for_device(
        &self,
        principal_id: Uuid,
        device_id: Uuid,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            UPDATE credentials SET revoked_at = now()
            WHERE principal_id = $1 AND device_id = $2 AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(principal_id)
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn recent_active(&self, limit: usize) -> Result<Vec<CredentialRecord>, StoreError> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT * FROM credentials
            WHERE revoked_at IS NULL AND consumed_at IS NULL AND expires_at > now()
            ORDER BY issued_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn find(&self, device_id: Uuid) -> Result<Option<Device>, StoreError> {
        sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Device::try_from)
            .transpose()
    }

    async fn find_by_hardware_id(
        &self,
        principal_id: Uuid,
        hardware_id: &str,
    ) -> Result<Option<Device>, StoreError> {
        sqlx::query_as::<_, DeviceRow>(
            "SELECT * FROM devices WHERE principal_id = $1 AND hardware_id = $2",
        )
        .bind(principal_id)
        .bind(hardware_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Device::try_from)
        .transpose()
    }

    async fn list_for_principal(&self, principal_id: Uuid) -> Result<Vec<Device>, StoreError> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT * FROM devices WHERE principal_id = $1 ORDER BY created_utc",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn insert(&self, device: &Device) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO devices (device_id, principal_id, hardware_id, fingerprint, trust_level,
                                 validation_streak, device_name, os, app_version, created_utc, last_seen_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(device.device_id)
        .bind(device.principal_id)
        .bind(&device.hardware_id)
        .bind(&device.fingerprint)
        .bind(device.trust_level.as_str())
        .bind(i32::try_from(device.validation_streak).unwrap_or(i32::MAX))
        .bind(&device.info.device_name)
        .bind(&device.info.os)
        .bind(&device.info.app_version)
        .bind(device.created_utc)
        .bind(device.last_seen_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_success(
        &self,
        device_id: Uuid,
        observed_streak: u32,
        trust_threshold: u32,
    ) -> Result<Option<Device>, StoreError> {
        let updated = sqlx::query_as::<_, DeviceRow>(
            r#"
            UPDATE devices
            SET validation_streak = validation_streak + 1,
                trust_level = CASE
                    WHEN trust_level = 'untrusted' THEN 'known'
                    WHEN trust_level = 'known' AND validation_streak + 1 >= $3 THEN 'trusted'
                    ELSE trust_level
                END,
                last_seen_utc = now()
            WHERE device_id = $1 AND validation_streak = $2
            RETURNING *
            "#,
        )
        .bind(device_id)
        .bind(i32::try_from(observed_streak).unwrap_or(i32::MAX))
        .bind(i32::try_from(trust_threshold).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(row) => Device::try_from(row).map(Some),
            None => DeviceStore::find(self, device_id).await,
        }
    }

    async fn reset_trust(&self, device_id: Uuid) -> Result<Option<Device>, StoreError> {
        sqlx::query_as::<_, DeviceRow>(
            r#"
            UPDATE devices SET trust_level = 'untrusted', validation_streak = 0
            WHERE device_id = $1
            RETURNING *
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Device::try_from)
        .transpose()
    }

    async fn touch(&self, device_id: Uuid, info: &DeviceInfo) -> Result<Option<Device>, StoreError> {
        sqlx::query_as::<_, DeviceRow>(
            r#"
            UPDATE devices SET device_name = $2, os = $3, app_version = $4, last_seen_utc = now()
            WHERE device_id = $1
            RETURNING *
            "#,
        )
        .bind(device_id)
        .bind(&info.device_name)
        .bind(&info.os)
        .bind(&info.app_version)
        .fetch_optional(&self.pool)
        .await?
        .map(Device::try_from)
        .transpose()
    }

    async fn delete(&self, device_id: Uuid) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM devices WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

#[async_trait]
impl PrincipalStore for PgStore {
    async fn find(&self, principal_id: Uuid) -> Result<Option<Principal>, StoreError> {
        sqlx::query_as::<_, PrincipalRow>("SELECT * FROM principals WHERE principal_id = $1")
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Principal::try_from)
            .transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        sqlx::query_as::<_, PrincipalRow>(
            "SELECT * FROM principals WHERE LOWER(username) = LOWER($1)",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?
        .map(Principal::try_from)
        .transpose()
    }

    async fn insert(&self, principal: &Principal) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO principals (principal_id, username, password_hash, role, tenant_id, is_active, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(principal.principal_id)
        .bind(&principal.username)
        .bind(&principal.password_hash)
        .bind(principal.role.as_str())
        .bind(principal.tenant_id)
        .bind(principal.is_active)
        .bind(principal.created_utc)
        .bind(principal.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for PgStore {
    async fn active_assignments(&self, principal_id: Uuid) -> Result<Vec<Assignment>, StoreError> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            "SELECT * FROM assignments WHERE principal_id = $1 AND is_active",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO assignments (assignment_id, principal_id, scope_level, entity_id, is_active, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(assignment.assignment_id)
        .bind(assignment.principal_id)
        .bind(assignment.level.as_str())
        .bind(assignment.entity_id)
        .bind(assignment.is_active)
        .bind(assignment.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn estates_in_tenants(&self, tenant_ids: &[Uuid]) -> Result<Vec<EstateRef>, StoreError> {
        let rows: Vec<(Uuid, Uuid)> =
            sqlx::query_as("SELECT estate_id, tenant_id FROM estates WHERE tenant_id = ANY($1)")
                .bind(tenant_ids)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(estate_id, tenant_id)| EstateRef {
                estate_id,
                tenant_id,
            })
            .collect())
    }

    async fn divisions_in_estates(
        &self,
        estate_ids: &[Uuid],
    ) -> Result<Vec<DivisionRef>, StoreError> {
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT division_id, estate_id FROM divisions WHERE estate_id = ANY($1)",
        )
        .bind(estate_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(division_id, estate_id)| DivisionRef {
                division_id,
                estate_id,
            })
            .collect())
    }

    async fn estates_by_id(&self, estate_ids: &[Uuid]) -> Result<Vec<EstateRef>, StoreError> {
        let rows: Vec<(Uuid, Uuid)> =
            sqlx::query_as("SELECT estate_id, tenant_id FROM estates WHERE estate_id = ANY($1)")
                .bind(estate_ids)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(estate_id, tenant_id)| EstateRef {
                estate_id,
                tenant_id,
            })
            .collect())
    }

    async fn divisions_by_id(&self, division_ids: &[Uuid]) -> Result<Vec<DivisionRef>, StoreError> {
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT division_id, estate_id FROM divisions WHERE division_id = ANY($1)",
        )
        .bind(division_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(division_id, estate_id)| DivisionRef {
                division_id,
                estate_id,
            })
            .collect())
    }
}
