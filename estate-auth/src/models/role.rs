//! Role hierarchy - a closed, ordered set of seven roles.
//!
//! Level 1 is the broadest authority, level 7 the narrowest. The static
//! definition table is an exhaustive `match`, so adding a role without a
//! definition does not compile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    AreaManager,
    CompanyAdmin,
    Manager,
    Asisten,
    Mandor,
    Satpam,
}

/// Wildcard permission granting everything.
pub const WILDCARD_PERMISSION: &str = "*";

/// Static facts about a role.
#[derive(Debug, Clone, Copy)]
pub struct RoleDefinition {
    pub role: Role,
    pub level: u8,
    pub display_name: &'static str,
    pub permissions: &'static [&'static str],
    pub web_access: bool,
    pub mobile_access: bool,
}

const SUPER_ADMIN: RoleDefinition = RoleDefinition {
    role: Role::SuperAdmin,
    level: 1,
    display_name: "Super Admin",
    permissions: &[WILDCARD_PERMISSION],
    web_access: true,
    mobile_access: false,
};

const AREA_MANAGER: RoleDefinition = RoleDefinition {
    role: Role::AreaManager,
    level: 2,
    display_name: "Area Manager",
    permissions: &[
        "companies:read",
        "companies:manage",
        "estates:read",
        "estates:manage",
        "users:read",
        "users:manage",
        "harvest:read",
        "harvest:approve",
        "gate:read",
        "gate:manage",
        "reports:read",
        "reports:generate",
    ],
    web_access: true,
    mobile_access: true,
};

const COMPANY_ADMIN: RoleDefinition = RoleDefinition {
    role: Role::CompanyAdmin,
    level: 3,
    display_name: "Company Admin",
    permissions: &[
        "company:read",
        "company:manage",
        "estates:read",
        "estates:manage",
        "users:read",
        "users:create",
        "users:update",
        "harvest:read",
        "harvest:approve",
        "gate:read",
        "reports:read",
        "reports:generate",
    ],
    web_access: true,
    mobile_access: false,
};

const MANAGER: RoleDefinition = RoleDefinition {
    role: Role::Manager,
    level: 4,
    display_name: "Manager",
    permissions: &[
        "estates:read",
        "divisions:read",
        "blocks:read",
        "harvest:read",
        "harvest:approve",
        "users:read",
        "gate:read",
        "reports:read",
        "reports:generate",
    ],
    web_access: true,
    mobile_access: true,
};

const ASISTEN: RoleDefinition = RoleDefinition {
    role: Role::Asisten,
    level: 5,
    display_name: "Asisten",
    permissions: &[
        "divisions:read",
        "blocks:read",
        "harvest:read",
        "harvest:approve",
        "harvest:reject",
        "users:read",
        "reports:read",
    ],
    web_access: true,
    mobile_access: true,
};

const MANDOR: RoleDefinition = RoleDefinition {
    role: Role::Mandor,
    level: 6,
    display_name: "Mandor",
    permissions: &[
        "blocks:read",
        "harvest:create",
        "harvest:read",
        "harvest:update",
        "reports:read",
    ],
    web_access: false,
    mobile_access: true,
};

const SATPAM: RoleDefinition = RoleDefinition {
    role: Role::Satpam,
    level: 7,
    display_name: "Satpam",
    permissions: &[
        "gate:create",
        "gate:read",
        "gate:update",
        "gate:complete",
        "qr:generate",
        "qr:scan",
        "reports:read",
    ],
    web_access: true,
    mobile_access: true,
};

impl Role {
    /// All roles, broadest first.
    pub const ALL: [Role; 7] = [
        Role::SuperAdmin,
        Role::AreaManager,
        Role::CompanyAdmin,
        Role::Manager,
        Role::Asisten,
        Role::Mandor,
        Role::Satpam,
    ];

    pub fn definition(self) -> &'static RoleDefinition {
        match self {
            Role::SuperAdmin => &SUPER_ADMIN,
            Role::AreaManager => &AREA_MANAGER,
            Role::CompanyAdmin => &COMPANY_ADMIN,
            Role::Manager => &MANAGER,
            Role::Asisten => &ASISTEN,
            Role::Mandor => &MANDOR,
            Role::Satpam => &SATPAM,
        }
    }

    pub fn level(self) -> u8 {
        self.definition().level
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::AreaManager => "AREA_MANAGER",
            Role::CompanyAdmin => "COMPANY_ADMIN",
            Role::Manager => "MANAGER",
            Role::Asisten => "ASISTEN",
            Role::Mandor => "MANDOR",
            Role::Satpam => "SATPAM",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid role: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_follow_declaration_order() {
        for (i, role) in Role::ALL.iter().enumerate() {
            assert_eq!(role.level() as usize, i + 1);
            assert_eq!(role.definition().role, *role);
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
        assert!("TIMBANGAN".parse::<Role>().is_err());
    }

    #[test]
    fn test_serde_uses_screaming_case() {
        let json = serde_json::to_string(&Role::CompanyAdmin).unwrap();
        assert_eq!(json, "\"COMPANY_ADMIN\"");
    }
}
