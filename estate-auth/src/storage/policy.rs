//! Row-level policy evaluation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::SecurityContext;
use crate::services::security_audit::SecurityAuditLog;
use crate::services::AuthError;

/// Location tags stored on every scoped row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowScope {
    pub tenant_id: Option<Uuid>,
    pub estate_id: Option<Uuid>,
    pub division_id: Option<Uuid>,
}

impl RowScope {
    pub fn tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    pub fn estate(tenant_id: Uuid, estate_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            estate_id: Some(estate_id),
            division_id: None,
        }
    }

    pub fn division(tenant_id: Uuid, estate_id: Uuid, division_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            estate_id: Some(estate_id),
            division_id: Some(division_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOperation {
    Read,
    Write,
}

impl RowOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            RowOperation::Read => "read",
            RowOperation::Write => "write",
        }
    }
}

pub struct RowPolicy;

impl RowPolicy {
    /// A row is visible when its most specific location tag is covered by
    /// the context scope. No context means deny. Untagged rows are visible
    /// only to the unbounded scope.
    pub fn allows(ctx: Option<&SecurityContext>, row: &RowScope) -> bool {
        let Some(ctx) = ctx else {
            return false;
        };
        let scope = &ctx.scope;
        if scope.is_all() {
            return true;
        }

        match (row.division_id, row.estate_id, row.tenant_id) {
            (Some(division), _, _) => scope.covers_division(division),
            (None, Some(estate), _) => scope.covers_estate(estate),
            (None, None, Some(tenant)) => scope.covers_tenant(tenant),
            (None, None, None) => false,
        }
    }

    pub fn check(
        ctx: Option<&SecurityContext>,
        row: &RowScope,
        op: RowOperation,
    ) -> Result<(), AuthError> {
        if Self::allows(ctx, row) {
            return Ok(());
        }

        let details = format!("{} denied for row scope {:?}", op.as_str(), row);
        match ctx {
            Some(ctx) => SecurityAuditLog::scope_violation(ctx.principal_id, details.clone()).emit(),
            None => tracing::warn!(operation = op.as_str(), "Row access attempted without security context"),
        }
        Err(AuthError::ScopeViolation(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, Scope, ScopeIds};

    fn context(scope: Scope) -> SecurityContext {
        SecurityContext {
            principal_id: Uuid::new_v4(),
            role: Role::Asisten,
            tenant_id: None,
            scope,
        }
    }

    #[test]
    fn test_no_context_denies() {
        let row = RowScope::tenant(Uuid::new_v4());
        assert!(!RowPolicy::allows(None, &row));
        assert!(matches!(
            RowPolicy::check(None, &row, RowOperation::Read),
            Err(AuthError::ScopeViolation(_))
        ));
    }

    #[test]
    fn test_most_specific_tag_decides() {
        let (tenant, estate, division) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut ids = ScopeIds::default();
        ids.tenant_ids.insert(tenant);
        ids.estate_ids.insert(estate);
        ids.division_ids.insert(division);
        let ctx = context(Scope::Limited(ids));

        assert!(RowPolicy::allows(Some(&ctx), &RowScope::division(tenant, estate, division)));
        assert!(RowPolicy::allows(Some(&ctx), &RowScope::estate(tenant, estate)));
        assert!(!RowPolicy::allows(
            Some(&ctx),
            &RowScope::division(tenant, estate, Uuid::new_v4())
        ));
    }

    #[test]
    fn test_untagged_rows_need_unbounded_scope() {
        let row = RowScope::default();
        assert!(!RowPolicy::allows(Some(&context(Scope::Limited(ScopeIds::default()))), &row));
        assert!(RowPolicy::allows(Some(&context(Scope::All)), &row));
    }
}
