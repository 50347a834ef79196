//! Entity tags.
//!
//! Tags are the string form entities take on the wire: `user-<name>[@domain]`,
//! `model-<uuid>` and `controller-<uuid>`. Parsing is strict: the kind prefix
//! must match and UUID tags must carry a syntactically valid UUID.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::GatewayError;

/// Failure to parse a tag.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// The tag does not start with the expected kind prefix.
    #[error("{tag:?} is not a valid {kind} tag")]
    WrongKind {
        /// The offending input.
        tag: String,
        /// Expected kind.
        kind: &'static str,
    },
    /// The id part is empty or malformed.
    #[error("invalid {kind} id {id:?}")]
    InvalidId {
        /// The offending id.
        id: String,
        /// Expected kind.
        kind: &'static str,
    },
}

impl From<TagError> for GatewayError {
    fn from(err: TagError) -> Self {
        GatewayError::bad_request(err.to_string())
    }
}

// ── UserTag ─────────────────────────────────────────────────────────

/// A user tag, `user-<name>` or `user-<name>@<domain>`.
///
/// A user without a domain is local to a single backend controller; users
/// provisioned through the gateway's identity provider always have one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserTag {
    name: String,
    domain: Option<String>,
}

impl UserTag {
    const PREFIX: &'static str = "user-";

    /// Build a tag from a user id such as `alice@external`.
    pub fn from_id(id: &str) -> Result<Self, TagError> {
        let invalid = || TagError::InvalidId {
            id: id.to_owned(),
            kind: "user",
        };
        let (name, domain) = match id.split_once('@') {
            Some((name, domain)) => {
                if domain.is_empty() {
                    return Err(invalid());
                }
                (name, Some(domain.to_owned()))
            }
            None => (id, None),
        };
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_owned(),
            domain,
        })
    }

    /// User name without the domain.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity-provider domain, if any.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Whether this user is local to a backend controller.
    pub fn is_local(&self) -> bool {
        self.domain.is_none()
    }

    /// The id form, `name[@domain]`.
    pub fn id(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}@{domain}", self.name),
            None => self.name.clone(),
        }
    }
}

impl FromStr for UserTag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.strip_prefix(Self::PREFIX).ok_or_else(|| TagError::WrongKind {
            tag: s.to_owned(),
            kind: "user",
        })?;
        Self::from_id(id)
    }
}

impl fmt::Display for UserTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.id())
    }
}

impl TryFrom<String> for UserTag {
    type Error = TagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserTag> for String {
    fn from(tag: UserTag) -> Self {
        tag.to_string()
    }
}

// ── UUID tags ───────────────────────────────────────────────────────

macro_rules! uuid_tag {
    ($(#[$meta:meta])* $name:ident, $prefix:literal, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID.
            pub fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse a bare UUID (no prefix).
            pub fn from_id(id: &str) -> Result<Self, TagError> {
                Uuid::parse_str(id).map(Self).map_err(|_| TagError::InvalidId {
                    id: id.to_owned(),
                    kind: $kind,
                })
            }

            /// The UUID this tag names.
            pub fn uuid(&self) -> Uuid {
                self.0
            }

            /// The id form (hyphenated UUID).
            pub fn id(&self) -> String {
                self.0.to_string()
            }
        }

        impl FromStr for $name {
            type Err = TagError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id = s.strip_prefix($prefix).ok_or_else(|| TagError::WrongKind {
                    tag: s.to_owned(),
                    kind: $kind,
                })?;
                Self::from_id(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = TagError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(tag: $name) -> Self {
                tag.to_string()
            }
        }
    };
}

uuid_tag!(
    /// A model tag, `model-<uuid>`.
    ModelTag,
    "model-",
    "model"
);

uuid_tag!(
    /// A controller tag, `controller-<uuid>`.
    ControllerTag,
    "controller-",
    "controller"
);

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "8f4c3e2a-5b1d-4c6e-9a7f-0123456789ab";

    #[test]
    fn parse_federated_user() {
        let tag: UserTag = "user-alice@canonical.com".parse().unwrap();
        assert_eq!(tag.name(), "alice");
        assert_eq!(tag.domain(), Some("canonical.com"));
        assert!(!tag.is_local());
        assert_eq!(tag.to_string(), "user-alice@canonical.com");
    }

    #[test]
    fn parse_local_user() {
        let tag: UserTag = "user-admin".parse().unwrap();
        assert!(tag.is_local());
        assert_eq!(tag.id(), "admin");
    }

    #[test]
    fn reject_wrong_prefix() {
        let err = "model-alice".parse::<UserTag>().unwrap_err();
        assert!(matches!(err, TagError::WrongKind { kind: "user", .. }));
    }

    #[test]
    fn reject_empty_name_or_domain() {
        assert!("user-".parse::<UserTag>().is_err());
        assert!("user-@idp".parse::<UserTag>().is_err());
        assert!("user-bob@".parse::<UserTag>().is_err());
    }

    #[test]
    fn user_tag_serde_as_string() {
        let tag = UserTag::from_id("bob@external").unwrap();
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(json, "\"user-bob@external\"");
        let back: UserTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
    }

    #[test]
    fn model_tag_parse_and_display() {
        let tag: ModelTag = format!("model-{UUID}").parse().unwrap();
        assert_eq!(tag.id(), UUID);
        assert_eq!(tag.to_string(), format!("model-{UUID}"));
    }

    #[test]
    fn model_tag_rejects_bad_uuid() {
        let err = "model-not-a-uuid".parse::<ModelTag>().unwrap_err();
        assert!(matches!(err, TagError::InvalidId { kind: "model", .. }));
    }

    #[test]
    fn controller_tag_rejects_model_prefix() {
        assert!(format!("model-{UUID}").parse::<ControllerTag>().is_err());
    }

    #[test]
    fn tag_error_becomes_bad_request() {
        let err: GatewayError = "nope".parse::<UserTag>().unwrap_err().into();
        assert_eq!(err.code(), crate::ErrorCode::BadRequest);
    }
}
