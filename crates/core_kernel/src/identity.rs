//! Authenticated caller identity
//!
//! The identity provider is an external collaborator. The core only consumes
//! the username, the role set, and the organization a supplier user belongs to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::CoreError;
use crate::identifiers::OrganizationId;

/// Username attributed to work done by scheduled jobs and the legacy consumer
pub const SYSTEM_USERNAME: &str = "system";

/// Roles recognised by the compliance workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Supplier,
    Analyst,
    ComplianceManager,
    Director,
    System,
}

impl Role {
    /// True for regulator staff roles
    pub fn is_government(&self) -> bool {
        matches!(self, Role::Analyst | Role::ComplianceManager | Role::Director)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Supplier => "supplier",
            Role::Analyst => "analyst",
            Role::ComplianceManager => "compliance_manager",
            Role::Director => "director",
            Role::System => "system",
        };
        f.write_str(name)
    }
}

/// The caller as seen by the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub username: String,
    pub roles: BTreeSet<Role>,
    /// Present for supplier users only
    pub organization_id: Option<OrganizationId>,
}

impl UserIdentity {
    pub fn new(username: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            username: username.into(),
            roles: roles.into_iter().collect(),
            organization_id: None,
        }
    }

    /// A supplier user bound to one organization
    pub fn supplier(username: impl Into<String>, organization_id: OrganizationId) -> Self {
        Self {
            organization_id: Some(organization_id),
            ..Self::new(username, [Role::Supplier])
        }
    }

    /// The identity used by background work
    pub fn system() -> Self {
        Self::new(SYSTEM_USERNAME, [Role::System])
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_government(&self) -> bool {
        self.roles.iter().any(Role::is_government)
    }

    pub fn is_system(&self) -> bool {
        self.has_role(Role::System)
    }

    /// Fails with `Forbidden` unless the caller holds one of `allowed`
    ///
    /// The system identity passes every role check.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), CoreError> {
        if self.is_system() || allowed.iter().any(|role| self.has_role(*role)) {
            return Ok(());
        }
        Err(CoreError::forbidden(format!(
            "{} requires one of [{}]",
            self.username,
            allowed.iter().map(Role::to_string).collect::<Vec<_>>().join(", ")
        )))
    }

    /// Fails with `Forbidden` when a supplier acts on another organization
    ///
    /// Government and system callers may act on any organization.
    pub fn require_org(&self, organization_id: OrganizationId) -> Result<(), CoreError> {
        if self.is_system() || self.is_government() {
            return Ok(());
        }
        match self.organization_id {
            Some(own) if own == organization_id => Ok(()),
            _ => Err(CoreError::forbidden(format!(
                "{} may not act for organization {}",
                self.username, organization_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplier_is_bound_to_organization() {
        let user = UserIdentity::supplier("jdoe", OrganizationId::new(7));
        assert!(user.require_org(OrganizationId::new(7)).is_ok());
        assert!(user.require_org(OrganizationId::new(8)).is_err());
        assert!(!user.is_government());
    }

    #[test]
    fn test_government_roles() {
        let analyst = UserIdentity::new("analyst", [Role::Analyst]);
        assert!(analyst.is_government());
        assert!(analyst.require_org(OrganizationId::new(99)).is_ok());
        assert!(analyst.require_role(&[Role::Director]).is_err());
        assert!(analyst.require_role(&[Role::Analyst, Role::Director]).is_ok());
    }

    #[test]
    fn test_system_passes_role_checks() {
        let system = UserIdentity::system();
        assert!(system.require_role(&[Role::Supplier]).is_ok());
        assert_eq!(system.username, SYSTEM_USERNAME);
    }
}
