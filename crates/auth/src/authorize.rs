use serde::Serialize;
use thiserror::Error;

use loomerp_core::TenantId;

use crate::{Permission, PrincipalId, TenantMembership};

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

impl Principal {
    /// Resolve a principal in `tenant_id` with the policy's grants for `roles`.
    pub fn resolve(principal_id: PrincipalId, tenant_id: TenantId, roles: &[crate::Role]) -> Self {
        Self {
            principal_id,
            active_tenant_id: tenant_id,
            membership: crate::policy::membership_for(tenant_id, roles),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Permissions a non-lifecycle command needs (creation, line edits, settlements).
///
/// The API checks these before dispatching. Status transitions are checked inside
/// the aggregate against the lifecycle edge instead.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Authorize a principal within its active tenant.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let granted = principal
        .membership
        .permissions
        .iter()
        .any(|p| p.is_wildcard() || p == required);

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[test]
    fn accountant_may_create_credit_notes_but_not_purchase_orders() {
        let tenant = TenantId::new();
        let principal = Principal::resolve(PrincipalId::new(), tenant, &[Role::new("accountant")]);

        assert!(authorize(&principal, &Permission::new("finance.credit_notes.create")).is_ok());
        assert_eq!(
            authorize(&principal, &Permission::new("purchases.orders.create")),
            Err(AuthzError::Forbidden("purchases.orders.create".to_string()))
        );
    }

    #[test]
    fn foreign_tenant_membership_is_rejected() {
        let mut principal =
            Principal::resolve(PrincipalId::new(), TenantId::new(), &[Role::new("admin")]);
        principal.active_tenant_id = TenantId::new();

        assert_eq!(
            authorize(&principal, &Permission::new("purchases.read")),
            Err(AuthzError::TenantMismatch)
        );
    }
}
