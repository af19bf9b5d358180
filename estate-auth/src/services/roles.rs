//! Role and permission resolution.
//!
//! Pure functions over the static role table. No I/O.

use serde::Serialize;
use uuid::Uuid;

use super::AuthError;
use crate::models::{Platform, Role, WILDCARD_PERMISSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessCheck {
    pub can_view: bool,
    pub can_manage: bool,
    pub can_assign: bool,
}

pub struct RoleResolver;

impl RoleResolver {
    pub fn has_permission(role: Role, permission: &str) -> bool {
        role.definition()
            .permissions
            .iter()
            .any(|p| *p == WILDCARD_PERMISSION || *p == permission)
    }

    /// Permission snapshot embedded into issued tokens.
    pub fn permissions(role: Role) -> Vec<String> {
        role.definition()
            .permissions
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    pub fn has_platform_access(role: Role, platform: Platform) -> bool {
        let definition = role.definition();
        match platform {
            Platform::Web => definition.web_access,
            Platform::Mobile => definition.mobile_access,
        }
    }

    /// Same level or narrower. The broadest role sees everything.
    pub fn can_view(requester: Role, target: Role) -> bool {
        requester == Role::SuperAdmin || requester.level() <= target.level()
    }

    /// Strictly broader. Nobody manages their own tier.
    pub fn can_manage(requester: Role, target: Role) -> bool {
        requester.level() < target.level()
    }

    pub fn can_assign(requester: Role, target: Role) -> bool {
        if !Self::can_manage(requester, target) {
            return false;
        }
        match target {
            Role::AreaManager => requester == Role::SuperAdmin,
            Role::CompanyAdmin => requester.level() <= Role::AreaManager.level(),
            _ => true,
        }
    }

    pub fn check_access(requester: Role, target: Role) -> AccessCheck {
        AccessCheck {
            can_view: Self::can_view(requester, target),
            can_manage: Self::can_manage(requester, target),
            can_assign: Self::can_assign(requester, target),
        }
    }

    /// Management check against a concrete principal. Acting on oneself is
    /// always allowed for self-service operations.
    pub fn can_manage_principal(
        requester_id: Uuid,
        requester: Role,
        target_id: Uuid,
        target: Role,
    ) -> bool {
        requester_id == target_id || Self::can_manage(requester, target)
    }

    pub fn manageable_roles(requester: Role) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|r| Self::can_manage(requester, *r))
            .collect()
    }

    pub fn assignable_roles(requester: Role) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|r| Self::can_assign(requester, *r))
            .collect()
    }

    /// Checks a role change requested by `requester`.
    ///
    /// Upgrades only need the new role to be assignable. Downgrades also
    /// require managing the current role.
    pub fn validate_role_transition(
        requester: Role,
        current: Role,
        new: Role,
    ) -> Result<(), AuthError> {
        if current == new {
            return Err(AuthError::InsufficientPermission(format!(
                "{} is already the current role",
                new
            )));
        }

        let is_downgrade = new.level() > current.level();
        if is_downgrade && !Self::can_manage(requester, current) {
            return Err(AuthError::InsufficientPermission(format!(
                "{} cannot downgrade {}",
                requester, current
            )));
        }

        if !Self::can_assign(requester, new) {
            return Err(AuthError::InsufficientPermission(format!(
                "{} cannot assign {}",
                requester, new
            )));
        }

        Ok(())
    }

    pub fn require_permission(role: Role, permission: &str) -> Result<(), AuthError> {
        if Self::has_permission(role, permission) {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermission(permission.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_grants_everything() {
        assert!(RoleResolver::has_permission(Role::SuperAdmin, "anything:at_all"));
        assert!(RoleResolver::has_permission(Role::Mandor, "harvest:create"));
        assert!(!RoleResolver::has_permission(Role::Mandor, "harvest:approve"));
        assert!(!RoleResolver::has_permission(Role::Satpam, "users:read"));
    }

    #[test]
    fn test_every_role_has_a_definition_with_permissions() {
        for role in Role::ALL {
            assert!(!role.definition().permissions.is_empty(), "{} has no permissions", role);
        }
    }

    #[test]
    fn test_manage_is_strictly_broader() {
        assert!(RoleResolver::can_manage(Role::Manager, Role::Asisten));
        assert!(!RoleResolver::can_manage(Role::Manager, Role::Manager));
        assert!(!RoleResolver::can_manage(Role::Asisten, Role::Manager));
        assert!(!RoleResolver::can_manage(Role::SuperAdmin, Role::SuperAdmin));
    }

    #[test]
    fn test_assignment_restrictions() {
        assert!(RoleResolver::can_assign(Role::SuperAdmin, Role::AreaManager));
        assert!(RoleResolver::can_assign(Role::AreaManager, Role::CompanyAdmin));
        assert!(!RoleResolver::can_assign(Role::AreaManager, Role::AreaManager));
        assert!(RoleResolver::can_assign(Role::CompanyAdmin, Role::Mandor));
    }

    #[test]
    fn test_check_access_for_peer() {
        let check = RoleResolver::check_access(Role::Manager, Role::Manager);
        assert_eq!(
            check,
            AccessCheck {
                can_view: true,
                can_manage: false,
                can_assign: false,
            }
        );
    }

    #[test]
    fn test_self_service_short_circuit() {
        let me = Uuid::new_v4();
        assert!(RoleResolver::can_manage_principal(me, Role::Satpam, me, Role::Satpam));
        assert!(!RoleResolver::can_manage_principal(
            me,
            Role::Satpam,
            Uuid::new_v4(),
            Role::Satpam
        ));
    }

    #[test]
    fn test_manageable_and_assignable_roles() {
        assert_eq!(
            RoleResolver::manageable_roles(Role::Asisten),
            vec![Role::Mandor, Role::Satpam]
        );
        assert!(RoleResolver::manageable_roles(Role::Satpam).is_empty());
        assert!(!RoleResolver::assignable_roles(Role::AreaManager).contains(&Role::AreaManager));
        assert_eq!(RoleResolver::assignable_roles(Role::SuperAdmin).len(), 6);
    }

    #[test]
    fn test_role_transitions() {
        assert!(
            RoleResolver::validate_role_transition(Role::CompanyAdmin, Role::Mandor, Role::Asisten)
                .is_ok()
        );
        assert!(
            RoleResolver::validate_role_transition(Role::Manager, Role::Asisten, Role::Manager)
                .is_err()
        );
        assert!(
            RoleResolver::validate_role_transition(Role::Manager, Role::Asisten, Role::Satpam)
                .is_ok()
        );
        assert!(
            RoleResolver::validate_role_transition(Role::Asisten, Role::Manager, Role::Satpam)
                .is_err()
        );
    }

    #[test]
    fn test_platform_access() {
        assert!(!RoleResolver::has_platform_access(Role::SuperAdmin, Platform::Mobile));
        assert!(!RoleResolver::has_platform_access(Role::Mandor, Platform::Web));
        assert!(RoleResolver::has_platform_access(Role::Manager, Platform::Mobile));
    }
}
