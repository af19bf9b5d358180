use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::Role;

/// Materialized tenant/estate/division identifiers a principal may act within.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeIds {
    pub tenant_ids: BTreeSet<Uuid>,
    pub estate_ids: BTreeSet<Uuid>,
    pub division_ids: BTreeSet<Uuid>,
}

impl ScopeIds {
    pub fn is_empty(&self) -> bool {
        self.tenant_ids.is_empty() && self.estate_ids.is_empty() && self.division_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Unbounded access.
    All,
    Limited(ScopeIds),
}

impl Scope {
    pub fn is_all(&self) -> bool {
        matches!(self, Scope::All)
    }

    pub fn covers_tenant(&self, tenant_id: Uuid) -> bool {
        match self {
            Scope::All => true,
            Scope::Limited(ids) => ids.tenant_ids.contains(&tenant_id),
        }
    }

    pub fn covers_estate(&self, estate_id: Uuid) -> bool {
        match self {
            Scope::All => true,
            Scope::Limited(ids) => ids.estate_ids.contains(&estate_id),
        }
    }

    pub fn covers_division(&self, division_id: Uuid) -> bool {
        match self {
            Scope::All => true,
            Scope::Limited(ids) => ids.division_ids.contains(&division_id),
        }
    }

    /// Flattened id lists for the storage layer. `All` yields empty lists;
    /// callers must pass the `all` flag alongside.
    pub fn id_lists(&self) -> (Vec<Uuid>, Vec<Uuid>, Vec<Uuid>) {
        match self {
            Scope::All => (Vec::new(), Vec::new(), Vec::new()),
            Scope::Limited(ids) => (
                ids.tenant_ids.iter().copied().collect(),
                ids.estate_ids.iter().copied().collect(),
                ids.division_ids.iter().copied().collect(),
            ),
        }
    }
}

/// Request-scoped view of who is calling and what they may touch.
///
/// Constructed once per request and passed by value down the call chain;
/// never stored anywhere that outlives the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityContext {
    pub principal_id: Uuid,
    pub role: Role,
    pub tenant_id: Option<Uuid>,
    pub scope: Scope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_serialization() {
        assert_eq!(serde_json::to_string(&Scope::All).unwrap(), "\"all\"");

        let mut ids = ScopeIds::default();
        let estate = Uuid::new_v4();
        ids.estate_ids.insert(estate);
        let scope = Scope::Limited(ids);
        let json = serde_json::to_value(&scope).unwrap();
        assert!(json.get("limited").is_some());

        let back: Scope = serde_json::from_value(json).unwrap();
        assert!(back.covers_estate(estate));
        assert!(!back.covers_estate(Uuid::new_v4()));
    }

    #[test]
    fn test_all_covers_everything() {
        let id = Uuid::new_v4();
        assert!(Scope::All.covers_tenant(id));
        assert!(Scope::All.covers_division(id));
        assert_eq!(Scope::All.id_lists(), (vec![], vec![], vec![]));
    }
}
