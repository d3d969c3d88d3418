use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role name carried in tokens (e.g. `store_keeper`).
///
/// Roles stay opaque strings here; [`crate::policy`] maps them to permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the policy knows this role.
    pub fn is_known(&self) -> bool {
        crate::policy::KNOWN_ROLES.contains(&self.as_str())
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
