//! Security context resolution and request-scoped installation.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{AuthError, StoreCallPolicy};
use crate::models::{Role, Scope, ScopeIds, ScopeLevel, SecurityContext};
use crate::storage::{ContextScope, ContextSink};
use crate::store::AssignmentStore;

pub struct SecurityContextPropagator {
    assignments: Arc<dyn AssignmentStore>,
    policy: StoreCallPolicy,
}

impl SecurityContextPropagator {
    pub fn new(assignments: Arc<dyn AssignmentStore>, policy: StoreCallPolicy) -> Self {
        Self {
            assignments,
            policy,
        }
    }

    /// Materialize the scope of a principal from its active assignments.
    ///
    /// Tenant and estate grants expand downwards to everything beneath
    /// them. Division and estate grants then add their ancestors, which do
    /// not expand further, so a division grant never reveals its siblings.
    pub async fn resolve_scope(
        &self,
        cancel: &CancellationToken,
        principal_id: Uuid,
        role: Role,
    ) -> Result<Scope, AuthError> {
        if role == Role::SuperAdmin {
            return Ok(Scope::All);
        }

        let assignments = self
            .policy
            .run(cancel, "assignments.active", || {
                self.assignments.active_assignments(principal_id)
            })
            .await?;

        let mut ids = ScopeIds::default();
        for assignment in assignments.iter().filter(|a| a.is_active) {
            match assignment.level {
                ScopeLevel::Tenant => ids.tenant_ids.insert(assignment.entity_id),
                ScopeLevel::Estate => ids.estate_ids.insert(assignment.entity_id),
                ScopeLevel::Division => ids.division_ids.insert(assignment.entity_id),
            };
        }

        let granted_divisions: Vec<Uuid> = ids.division_ids.iter().copied().collect();

        if !ids.tenant_ids.is_empty() {
            let tenants: Vec<Uuid> = ids.tenant_ids.iter().copied().collect();
            let estates = self
                .policy
                .run(cancel, "hierarchy.estates_in_tenants", || {
                    self.assignments.estates_in_tenants(&tenants)
                })
                .await?;
            ids.estate_ids.extend(estates.iter().map(|e| e.estate_id));
        }

        if !ids.estate_ids.is_empty() {
            let estates: Vec<Uuid> = ids.estate_ids.iter().copied().collect();
            let divisions = self
                .policy
                .run(cancel, "hierarchy.divisions_in_estates", || {
                    self.assignments.divisions_in_estates(&estates)
                })
                .await?;
            ids.division_ids.extend(divisions.iter().map(|d| d.division_id));
        }

        if !granted_divisions.is_empty() {
            let parents = self
                .policy
                .run(cancel, "hierarchy.divisions_by_id", || {
                    self.assignments.divisions_by_id(&granted_divisions)
                })
                .await?;
            ids.estate_ids.extend(parents.iter().map(|d| d.estate_id));
        }

        if !ids.estate_ids.is_empty() {
            let estates: Vec<Uuid> = ids.estate_ids.iter().copied().collect();
            let parents = self
                .policy
                .run(cancel, "hierarchy.estates_by_id", || {
                    self.assignments.estates_by_id(&estates)
                })
                .await?;
            ids.tenant_ids.extend(parents.iter().map(|e| e.tenant_id));
        }

        tracing::debug!(
            principal_id = %principal_id,
            tenants = ids.tenant_ids.len(),
            estates = ids.estate_ids.len(),
            divisions = ids.division_ids.len(),
            "Resolved scope"
        );
        Ok(Scope::Limited(ids))
    }

    pub async fn build_context(
        &self,
        cancel: &CancellationToken,
        principal_id: Uuid,
        role: Role,
        tenant_id: Option<Uuid>,
    ) -> Result<SecurityContext, AuthError> {
        let scope = self.resolve_scope(cancel, principal_id, role).await?;
        Ok(SecurityContext {
            principal_id,
            role,
            tenant_id,
            scope,
        })
    }

    /// Run `work` on `session` with `ctx` installed. The context is cleared
    /// when `work` completes and discarded if it errors, panics or is
    /// dropped mid-flight.
    pub async fn run_scoped<S, T, F>(
        session: &mut S,
        ctx: &SecurityContext,
        work: F,
    ) -> Result<T, AuthError>
    where
        S: ContextSink,
        F: for<'s> FnOnce(&'s mut S) -> BoxFuture<'s, Result<T, AuthError>>,
    {
        let mut scope = ContextScope::install(session, ctx).await?;
        let result = work(scope.session()).await;
        scope.finish().await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::models::Assignment;
    use crate::store::MemoryStore;

    struct Hierarchy {
        tenant: Uuid,
        estate_a: Uuid,
        estate_b: Uuid,
        division_a1: Uuid,
        division_a2: Uuid,
        division_b1: Uuid,
    }

    fn hierarchy(store: &MemoryStore) -> Hierarchy {
        let h = Hierarchy {
            tenant: Uuid::new_v4(),
            estate_a: Uuid::new_v4(),
            estate_b: Uuid::new_v4(),
            division_a1: Uuid::new_v4(),
            division_a2: Uuid::new_v4(),
            division_b1: Uuid::new_v4(),
        };
        store.add_estate(h.estate_a, h.tenant);
        store.add_estate(h.estate_b, h.tenant);
        store.add_division(h.division_a1, h.estate_a);
        store.add_division(h.division_a2, h.estate_a);
        store.add_division(h.division_b1, h.estate_b);
        h
    }

    fn propagator(store: Arc<MemoryStore>) -> SecurityContextPropagator {
        SecurityContextPropagator::new(
            store,
            StoreCallPolicy::from_config(&AuthConfig::for_tests().store),
        )
    }

    async fn grant(store: &MemoryStore, principal: Uuid, level: ScopeLevel, entity: Uuid) {
        store
            .insert_assignment(&Assignment::new(principal, level, entity))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_super_admin_short_circuits() {
        let store = Arc::new(MemoryStore::new());
        let scope = propagator(store.clone())
            .resolve_scope(&CancellationToken::new(), Uuid::new_v4(), Role::SuperAdmin)
            .await
            .unwrap();
        assert_eq!(scope, Scope::All);
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_division_grant_adds_ancestors_not_siblings() {
        let store = Arc::new(MemoryStore::new());
        let h = hierarchy(&store);
        let principal = Uuid::new_v4();
        grant(&store, principal, ScopeLevel::Division, h.division_a1).await;

        let scope = propagator(store)
            .resolve_scope(&CancellationToken::new(), principal, Role::Asisten)
            .await
            .unwrap();

        assert!(scope.covers_division(h.division_a1));
        assert!(!scope.covers_division(h.division_a2));
        assert!(scope.covers_estate(h.estate_a));
        assert!(!scope.covers_estate(h.estate_b));
        assert!(scope.covers_tenant(h.tenant));
    }

    #[tokio::test]
    async fn test_estate_grant_expands_to_divisions() {
        let store = Arc::new(MemoryStore::new());
        let h = hierarchy(&store);
        let principal = Uuid::new_v4();
        grant(&store, principal, ScopeLevel::Estate, h.estate_a).await;

        let scope = propagator(store)
            .resolve_scope(&CancellationToken::new(), principal, Role::Manager)
            .await
            .unwrap();

        assert!(scope.covers_division(h.division_a1));
        assert!(scope.covers_division(h.division_a2));
        assert!(!scope.covers_division(h.division_b1));
        assert!(scope.covers_tenant(h.tenant));
    }

    #[tokio::test]
    async fn test_tenant_grant_expands_fully() {
        let store = Arc::new(MemoryStore::new());
        let h = hierarchy(&store);
        let principal = Uuid::new_v4();
        grant(&store, principal, ScopeLevel::Tenant, h.tenant).await;

        let scope = propagator(store)
            .resolve_scope(&CancellationToken::new(), principal, Role::CompanyAdmin)
            .await
            .unwrap();

        assert!(scope.covers_estate(h.estate_b));
        assert!(scope.covers_division(h.division_b1));
    }

    #[tokio::test]
    async fn test_no_assignments_yields_empty_scope() {
        let store = Arc::new(MemoryStore::new());
        let scope = propagator(store)
            .resolve_scope(&CancellationToken::new(), Uuid::new_v4(), Role::Satpam)
            .await
            .unwrap();
        assert_eq!(scope, Scope::Limited(ScopeIds::default()));
    }

    #[tokio::test]
    async fn test_store_outage_is_unavailable_not_allow() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(10);
        let err = propagator(store)
            .resolve_scope(&CancellationToken::new(), Uuid::new_v4(), Role::Manager)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
    }
}
