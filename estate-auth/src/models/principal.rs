use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Role;

/// An authenticated identity. Principals are soft-deactivated, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    /// Owning company. Cross-company roles have none.
    pub tenant_id: Option<Uuid>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Principal {
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
        role: Role,
        tenant_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            principal_id: Uuid::new_v4(),
            username: username.into(),
            password_hash: password_hash.into(),
            role,
            tenant_id,
            is_active: true,
            created_utc: now,
            updated_utc: now,
        }
    }
}
