//! Role → permission policy for the garment ERP departments.
//!
//! Permission names follow `<module>.<resource>.<action>` and match the `permission`
//! column of each entity's lifecycle table. `<module>.read` grants the module's list
//! and detail endpoints.

use std::collections::BTreeSet;

use loomerp_core::{Actor, TenantId, UserId};

use crate::{Permission, PrincipalId, Role, TenantMembership};

const ADMIN: &[&str] = &["*"];

const PURCHASE_MANAGER: &[&str] = &[
    "purchases.read",
    "finance.read",
    "inventory.read",
    "purchases.orders.create",
    "purchases.orders.edit",
    "purchases.orders.submit",
    "purchases.orders.approve",
    "purchases.orders.cancel",
    "purchases.orders.send",
    "purchases.orders.close",
    "purchases.grn.close",
    "purchases.grn.cancel",
    "purchases.returns.create",
    "purchases.returns.approve",
    "purchases.returns.cancel",
];

const PURCHASE_OFFICER: &[&str] = &[
    "purchases.read",
    "inventory.read",
    "purchases.orders.create",
    "purchases.orders.edit",
    "purchases.orders.submit",
    "purchases.orders.send",
    "purchases.returns.create",
    "purchases.returns.dispatch",
    "purchases.returns.acknowledge",
];

const STORE_KEEPER: &[&str] = &[
    "purchases.read",
    "inventory.read",
    "purchases.grn.create",
    "purchases.grn.record",
    "purchases.grn.submit",
    "purchases.grn.cancel",
    "purchases.receipts.record",
    "purchases.returns.dispatch",
    "inventory.material_requests.issue",
    "inventory.material_requests.close",
    "inventory.material_returns.receive",
];

const QUALITY_INSPECTOR: &[&str] = &["purchases.read", "purchases.grn.inspect"];

const ACCOUNTANT: &[&str] = &[
    "finance.read",
    "purchases.read",
    "finance.credit_notes.create",
    "finance.credit_notes.issue",
    "finance.credit_notes.accept",
    "finance.credit_notes.settle",
    "finance.credit_notes.cancel",
    "finance.debit_notes.create",
    "finance.debit_notes.send",
    "finance.debit_notes.adjust",
    "finance.debit_notes.cancel",
];

const PRODUCTION_SUPERVISOR: &[&str] = &[
    "inventory.read",
    "inventory.material_requests.create",
    "inventory.material_requests.approve",
    "inventory.material_requests.cancel",
    "inventory.material_returns.create",
    "inventory.material_returns.approve",
];

const LOGISTICS: &[&str] = &[
    "shipping.read",
    "shipping.shipments.create",
    "shipping.shipments.edit",
    "shipping.shipments.pack",
    "shipping.shipments.dispatch",
    "shipping.shipments.track",
    "shipping.shipments.deliver",
    "shipping.shipments.return",
    "shipping.shipments.cancel",
];

const VIEWER: &[&str] = &["purchases.read", "finance.read", "inventory.read", "shipping.read"];

/// Role names this policy knows about.
pub const KNOWN_ROLES: &[&str] = &[
    "admin",
    "purchase_manager",
    "purchase_officer",
    "store_keeper",
    "quality_inspector",
    "accountant",
    "production_supervisor",
    "logistics",
    "viewer",
];

/// Permissions granted by a single role (empty for unknown roles).
pub fn role_permissions(role: &str) -> &'static [&'static str] {
    match role {
        "admin" => ADMIN,
        "purchase_manager" => PURCHASE_MANAGER,
        "purchase_officer" => PURCHASE_OFFICER,
        "store_keeper" => STORE_KEEPER,
        "quality_inspector" => QUALITY_INSPECTOR,
        "accountant" => ACCOUNTANT,
        "production_supervisor" => PRODUCTION_SUPERVISOR,
        "logistics" => LOGISTICS,
        "viewer" => VIEWER,
        _ => &[],
    }
}

/// Union of the permissions granted by `roles`, sorted and deduplicated.
pub fn grants_for(roles: &[Role]) -> BTreeSet<&'static str> {
    roles
        .iter()
        .flat_map(|r| role_permissions(r.as_str()).iter().copied())
        .collect()
}

pub fn membership_for(tenant_id: TenantId, roles: &[Role]) -> TenantMembership {
    TenantMembership {
        tenant_id,
        roles: roles.to_vec(),
        permissions: grants_for(roles).into_iter().map(Permission::new).collect(),
    }
}

/// Actor performing lifecycle transitions on behalf of a principal.
pub fn actor_for(principal_id: PrincipalId, roles: &[Role]) -> Actor {
    Actor::new(UserId::from(principal_id), grants_for(roles))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_roles_grant_nothing() {
        assert!(role_permissions("intern").is_empty());
        assert!(grants_for(&[Role::new("intern")]).is_empty());
    }

    #[test]
    fn every_known_role_grants_something() {
        for role in KNOWN_ROLES {
            assert!(!role_permissions(role).is_empty(), "{role} has no grants");
        }
    }

    #[test]
    fn actor_merges_grants_across_roles() {
        let actor = actor_for(
            PrincipalId::new(),
            &[Role::new("store_keeper"), Role::new("quality_inspector")],
        );

        assert!(actor.can("purchases.grn.submit"));
        assert!(actor.can("purchases.grn.inspect"));
        assert!(!actor.can("purchases.orders.approve"));
    }

    #[test]
    fn only_managers_approve_purchase_orders() {
        let approvers: Vec<&str> = KNOWN_ROLES
            .iter()
            .copied()
            .filter(|r| actor_for(PrincipalId::new(), &[Role::new(*r)]).can("purchases.orders.approve"))
            .collect();

        assert_eq!(approvers, vec!["admin", "purchase_manager"]);
    }
}
