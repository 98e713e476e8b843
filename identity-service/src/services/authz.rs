use std::sync::Arc;

use crate::models::{Account, Action, Permission, RoleName, RoleRegistry};
use crate::services::error::ServiceError;

/// Outcome of a permission check. Anything that is not an explicit
/// grant is `Deny`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Pure permission evaluator over the role registry. Holds no mutable
/// state and performs no I/O; every decision is a table lookup.
#[derive(Clone)]
pub struct Evaluator {
    registry: Arc<RoleRegistry>,
}

impl Evaluator {
    pub fn new(registry: Arc<RoleRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    /// Does `account` hold `action` on `resource`? A `manage` grant on
    /// the resource satisfies any action on it. Unknown roles and
    /// unknown resources deny.
    pub fn check(&self, account: &Account, resource: &str, action: Action) -> Decision {
        let requested = Permission::new(resource, action);
        let manage = Permission::new(resource, Action::Manage);

        if let Some(role) = self.registry.get(&account.role) {
            if role.permissions.contains(&requested) || role.permissions.contains(&manage) {
                return Decision::Allow;
            }
        }
        if account.overrides.contains(&requested) || account.overrides.contains(&manage) {
            return Decision::Allow;
        }
        Decision::Deny
    }

    /// `check` in handler-friendly form: deny becomes an error.
    pub fn require(
        &self,
        account: &Account,
        resource: &str,
        action: Action,
    ) -> Result<(), ServiceError> {
        match self.check(account, resource, action) {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(ServiceError::PermissionDenied),
        }
    }

    /// May `inviter` hand out `target`? Granting is capped at the
    /// inviter's own privilege level; unknown roles on either side deny.
    pub fn may_assign(&self, inviter: &Account, target: &RoleName) -> bool {
        let (Some(own), Some(target)) = (
            self.registry.get(&inviter.role),
            self.registry.get(target),
        ) else {
            return false;
        };
        target.level >= own.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountStatus, TwoFactorChallenge};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn account_with_role(role: &str) -> Account {
        Account::bootstrap(
            "member@x.com".to_string(),
            "$argon2id$stub".to_string(),
            RoleName::new(role),
        )
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(Arc::new(RoleRegistry::builtin()))
    }

    #[test]
    fn test_executive_cannot_manage_users() {
        let evaluator = evaluator();
        let executive = account_with_role("EXECUTIVE");
        assert_eq!(
            evaluator.check(&executive, "users", Action::Manage),
            Decision::Deny
        );
    }

    #[test]
    fn test_admin_manages_and_reads_users() {
        let evaluator = evaluator();
        let admin = account_with_role("ADMIN");
        assert_eq!(
            evaluator.check(&admin, "users", Action::Manage),
            Decision::Allow
        );
        // manage implies read on the same resource
        assert_eq!(
            evaluator.check(&admin, "users", Action::Read),
            Decision::Allow
        );
        assert_eq!(
            evaluator.check(&admin, "users", Action::Write),
            Decision::Allow
        );
    }

    #[test]
    fn test_executive_business_grants() {
        let evaluator = evaluator();
        let executive = account_with_role("EXECUTIVE");
        assert!(evaluator.check(&executive, "clients", Action::Write).is_allow());
        assert!(evaluator.check(&executive, "reports", Action::Read).is_allow());
        assert_eq!(
            evaluator.check(&executive, "reports", Action::Write),
            Decision::Deny
        );
    }

    #[test]
    fn test_unknown_role_denies_everything() {
        let evaluator = evaluator();
        let stranger = account_with_role("CONTRACTOR");
        assert_eq!(
            evaluator.check(&stranger, "clients", Action::Read),
            Decision::Deny
        );
    }

    #[test]
    fn test_unknown_resource_denies() {
        let evaluator = evaluator();
        let super_admin = account_with_role("SUPER_ADMIN");
        assert_eq!(
            evaluator.check(&super_admin, "starships", Action::Read),
            Decision::Deny
        );
    }

    #[test]
    fn test_account_status_does_not_change_the_decision() {
        let evaluator = evaluator();
        let mut admin = account_with_role("ADMIN");
        admin.status = AccountStatus::PendingTwoFactor;
        admin.two_factor = Some(TwoFactorChallenge {
            code_hash: "ab".repeat(32),
            expires_utc: Utc::now() + Duration::minutes(10),
        });
        // The evaluator judges permissions only; liveness is the
        // caller's concern.
        assert!(evaluator.check(&admin, "users", Action::Manage).is_allow());
    }

    #[test]
    fn test_override_grants_without_role_change() {
        let evaluator = evaluator();
        let mut executive = account_with_role("EXECUTIVE");
        executive.overrides.push(Permission::new("reports", Action::Manage));
        assert!(evaluator.check(&executive, "reports", Action::Write).is_allow());
        assert_eq!(
            evaluator.check(&executive, "users", Action::Read),
            Decision::Deny
        );
    }

    #[test]
    fn test_require_maps_deny_to_permission_denied() {
        let evaluator = evaluator();
        let executive = account_with_role("EXECUTIVE");
        assert!(matches!(
            evaluator.require(&executive, "users", Action::Manage),
            Err(ServiceError::PermissionDenied)
        ));
        assert!(evaluator.require(&executive, "clients", Action::Read).is_ok());
    }

    #[test]
    fn test_assignment_is_capped_at_own_level() {
        let evaluator = evaluator();
        let admin = account_with_role("ADMIN");
        assert!(evaluator.may_assign(&admin, &RoleName::new("ADMIN")));
        assert!(evaluator.may_assign(&admin, &RoleName::new("EXECUTIVE")));
        assert!(!evaluator.may_assign(&admin, &RoleName::new("SUPER_ADMIN")));
        assert!(!evaluator.may_assign(&admin, &RoleName::new("CONTRACTOR")));

        let super_admin = account_with_role("SUPER_ADMIN");
        assert!(evaluator.may_assign(&super_admin, &RoleName::new("SUPER_ADMIN")));
    }
}
