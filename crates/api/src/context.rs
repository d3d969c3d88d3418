use loomerp_auth::{policy, PrincipalId, Role};
use loomerp_core::{Actor, TenantId, UserId};

/// Tenant context for a request.
///
/// Taken from the verified token, never from the request body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Principal context for a request (authenticated identity + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self { principal_id, roles }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn user_id(&self) -> UserId {
        UserId::from(self.principal_id)
    }

    /// The actor lifecycle transitions run as.
    pub fn actor(&self) -> Actor {
        policy::actor_for(self.principal_id, &self.roles)
    }
}
