//! Scope assignments and the company → estate → division hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Level of the organisational hierarchy an assignment points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Tenant,
    Estate,
    Division,
}

impl ScopeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeLevel::Tenant => "tenant",
            ScopeLevel::Estate => "estate",
            ScopeLevel::Division => "division",
        }
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tenant" => Ok(ScopeLevel::Tenant),
            "estate" => Ok(ScopeLevel::Estate),
            "division" => Ok(ScopeLevel::Division),
            _ => Err(format!("Invalid scope level: {}", s)),
        }
    }
}

/// Grants a principal the right to act within one tenant, estate or division.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: Uuid,
    pub principal_id: Uuid,
    pub level: ScopeLevel,
    pub entity_id: Uuid,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl Assignment {
    pub fn new(principal_id: Uuid, level: ScopeLevel, entity_id: Uuid) -> Self {
        Self {
            assignment_id: Uuid::new_v4(),
            principal_id,
            level,
            entity_id,
            is_active: true,
            created_utc: Utc::now(),
        }
    }
}

/// An estate and the company it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstateRef {
    pub estate_id: Uuid,
    pub tenant_id: Uuid,
}

/// A division and the estate it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivisionRef {
    pub division_id: Uuid,
    pub estate_id: Uuid,
}
