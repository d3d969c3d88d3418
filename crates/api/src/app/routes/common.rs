use axum::response::Response;

use loomerp_auth::{CommandAuthorization, Permission};
use loomerp_core::AggregateId;

use crate::app::errors;
use crate::context::{PrincipalContext, TenantContext};

/// Small helper wrapper to associate required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CmdAuth<C> {
    pub fn new(inner: C, required: &[&'static str]) -> Self {
        Self {
            inner,
            required: required.iter().copied().map(Permission::new).collect(),
        }
    }

    /// Check the caller may run the command and hand it back.
    pub fn authorize(self, tenant: &TenantContext, principal: &PrincipalContext) -> Result<C, Response> {
        crate::authz::authorize_command(tenant, principal, &self).map_err(errors::authz_error_to_response)?;
        Ok(self.inner)
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Permission check for reads and other requests without a command.
pub fn require(tenant: &TenantContext, principal: &PrincipalContext, permission: &'static str) -> Result<(), Response> {
    CmdAuth::new((), &[permission]).authorize(tenant, principal)
}

pub fn parse_id(raw: &str) -> Result<AggregateId, Response> {
    raw.parse().map_err(errors::domain_error_to_response)
}

pub fn parse_optional_id(raw: Option<&str>) -> Result<Option<AggregateId>, Response> {
    raw.map(parse_id).transpose()
}
