//! API-side authorization guard for non-lifecycle commands.
//!
//! Creation, line edits, settlements and reads are checked here before dispatch.
//! Status transitions are checked by the aggregate against the lifecycle edge.

use loomerp_auth::{authorize, AuthzError, CommandAuthorization, Principal};

use crate::context::{PrincipalContext, TenantContext};

/// Check authorization for a command in the current request context.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let principal = Principal::resolve(principal.principal_id(), tenant.tenant_id(), principal.roles());

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}
