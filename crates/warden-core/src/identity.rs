//! Authenticated identities and model access levels.

use serde::{Deserialize, Serialize};

use crate::tags::UserTag;

/// Model access level, ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Read model state and logs.
    Read,
    /// Change the model (deploy, upload charms).
    Write,
    /// Administer the model.
    Admin,
}

impl Access {
    /// Wire name of the access level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

/// A user the gateway has authenticated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The user's tag.
    pub tag: UserTag,
    /// Name shown to clients.
    pub display_name: String,
    /// Whether the user administers the gateway itself.
    pub admin: bool,
}

impl Identity {
    /// Create a non-administrator identity whose display name is its id.
    pub fn new(tag: UserTag) -> Self {
        let display_name = tag.name().to_owned();
        Self {
            tag,
            display_name,
            admin: false,
        }
    }

    /// Mark this identity as a gateway administrator.
    #[must_use]
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Controller access level reported at login.
    pub fn controller_access(&self) -> &'static str {
        if self.admin { "superuser" } else { "login" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_ordering() {
        assert!(Access::Read < Access::Write);
        assert!(Access::Write < Access::Admin);
    }

    #[test]
    fn new_identity_is_not_admin() {
        let id = Identity::new(UserTag::from_id("alice@idp").unwrap());
        assert!(!id.admin);
        assert_eq!(id.display_name, "alice");
        assert_eq!(id.controller_access(), "login");
    }

    #[test]
    fn admin_identity_is_superuser() {
        let id = Identity::new(UserTag::from_id("root@idp").unwrap()).with_admin(true);
        assert_eq!(id.controller_access(), "superuser");
    }
}
