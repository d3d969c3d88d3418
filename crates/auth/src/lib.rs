//! `loomerp-auth`: authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: token validation, the role→permission policy and
//! the pure `authorize` check. Lifecycle aggregates receive the resolved
//! [`loomerp_core::Actor`] and check per-edge permissions themselves.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
