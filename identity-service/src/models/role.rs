use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Case-insensitive role identifier. Stored uppercase so that lookups,
/// token claims, and database rows all agree on one spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoleName(String);

impl RoleName {
    pub fn new(raw: &str) -> Self {
        RoleName(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoleName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(RoleName::new(&raw))
    }
}

/// What a member may do with a resource. `Manage` implies both `Read`
/// and `Write` on the same resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Manage,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Manage => "manage",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            "manage" => Ok(Action::Manage),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

/// A single `resource:action` grant. The resource part is normalized to
/// lowercase on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    resource: String,
    action: Action,
}

impl Permission {
    pub fn new(resource: &str, action: Action) -> Self {
        Permission {
            resource: resource.trim().to_lowercase(),
            action,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> Action {
        self.action
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| format!("Malformed permission (expected resource:action): {}", s))?;
        if resource.trim().is_empty() {
            return Err(format!("Malformed permission (empty resource): {}", s));
        }
        Ok(Permission::new(resource, action.parse()?))
    }
}

/// A named bundle of permissions with a privilege level. Lower levels
/// are more privileged; level 0 is reserved for the platform owner.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: RoleName,
    pub level: u8,
    pub permissions: BTreeSet<Permission>,
}

/// Lookup table of all roles the service knows about. Authorization
/// decisions never consult anything outside this registry.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: HashMap<RoleName, Role>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        RoleRegistry::default()
    }

    /// The built-in role table for the backoffice product.
    pub fn builtin() -> Self {
        let mut registry = RoleRegistry::new();

        let mut super_admin = BTreeSet::new();
        for resource in [
            "users",
            "roles",
            "settings",
            "clients",
            "providers",
            "products",
            "proposals",
            "quotations",
            "reports",
        ] {
            super_admin.insert(Permission::new(resource, Action::Manage));
        }
        registry.register(Role {
            name: RoleName::new("SUPER_ADMIN"),
            level: 0,
            permissions: super_admin,
        });

        let mut admin = BTreeSet::new();
        for resource in [
            "users",
            "clients",
            "providers",
            "products",
            "proposals",
            "quotations",
        ] {
            admin.insert(Permission::new(resource, Action::Manage));
        }
        admin.insert(Permission::new("reports", Action::Read));
        registry.register(Role {
            name: RoleName::new("ADMIN"),
            level: 1,
            permissions: admin,
        });

        let mut executive = BTreeSet::new();
        for resource in ["clients", "proposals", "quotations"] {
            executive.insert(Permission::new(resource, Action::Read));
            executive.insert(Permission::new(resource, Action::Write));
        }
        for resource in ["providers", "products", "reports"] {
            executive.insert(Permission::new(resource, Action::Read));
        }
        registry.register(Role {
            name: RoleName::new("EXECUTIVE"),
            level: 2,
            permissions: executive,
        });

        registry
    }

    pub fn register(&mut self, role: Role) {
        self.roles.insert(role.name.clone(), role);
    }

    pub fn get(&self, name: &RoleName) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn contains(&self, name: &RoleName) -> bool {
        self.roles.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_name_is_case_insensitive() {
        assert_eq!(RoleName::new("admin"), RoleName::new("ADMIN"));
        assert_eq!(RoleName::new("  Executive "), RoleName::new("EXECUTIVE"));
        assert_eq!(RoleName::new("super_admin").as_str(), "SUPER_ADMIN");
    }

    #[test]
    fn test_permission_parse_and_display_round_trip() {
        let permission: Permission = "Clients:Manage".parse().unwrap();
        assert_eq!(permission.resource(), "clients");
        assert_eq!(permission.action(), Action::Manage);
        assert_eq!(permission.to_string(), "clients:manage");
    }

    #[test]
    fn test_permission_parse_rejects_malformed_input() {
        assert!("clients".parse::<Permission>().is_err());
        assert!(":read".parse::<Permission>().is_err());
        assert!("clients:delete".parse::<Permission>().is_err());
    }

    #[test]
    fn test_action_parse_rejects_unknown_action() {
        assert!("delete".parse::<Action>().is_err());
        assert_eq!("MANAGE".parse::<Action>().unwrap(), Action::Manage);
    }

    #[test]
    fn test_builtin_registry_has_expected_roles() {
        let registry = RoleRegistry::builtin();
        assert!(registry.contains(&RoleName::new("SUPER_ADMIN")));
        assert!(registry.contains(&RoleName::new("ADMIN")));
        assert!(registry.contains(&RoleName::new("EXECUTIVE")));
        assert!(!registry.contains(&RoleName::new("INTERN")));
    }

    #[test]
    fn test_builtin_levels_order_privilege() {
        let registry = RoleRegistry::builtin();
        let super_admin = registry.get(&RoleName::new("SUPER_ADMIN")).unwrap();
        let admin = registry.get(&RoleName::new("ADMIN")).unwrap();
        let executive = registry.get(&RoleName::new("EXECUTIVE")).unwrap();
        assert!(super_admin.level < admin.level);
        assert!(admin.level < executive.level);
    }

    #[test]
    fn test_executive_has_no_user_permissions() {
        let registry = RoleRegistry::builtin();
        let executive = registry.get(&RoleName::new("EXECUTIVE")).unwrap();
        assert!(!executive
            .permissions
            .iter()
            .any(|permission| permission.resource() == "users"));
    }
}
