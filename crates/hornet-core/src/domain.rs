//! Address and identifier newtypes shared across the core.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix markers used by the transport's address space.
///
/// The gateway maps the wire-level address forms onto these; the core only
/// cares about the conversation class and the linked-device alias rewrite.
const USER_SUFFIX: &str = "@user";
const GROUP_SUFFIX: &str = "@group";
const CHANNEL_SUFFIX: &str = "@channel";
const ALIAS_SUFFIX: &str = "@alias";

/// An addressable identity: a direct user, a group, a broadcast channel or a
/// linked-device alias of a user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

impl Jid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Direct-user address from a bare number.
    pub fn user(number: &str) -> Self {
        Self(format!("{number}{USER_SUFFIX}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the `@` marker (usually the phone number).
    pub fn bare(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_SUFFIX)
    }

    pub fn is_channel(&self) -> bool {
        self.0.ends_with(CHANNEL_SUFFIX)
    }

    pub fn is_linked_alias(&self) -> bool {
        self.0.ends_with(ALIAS_SUFFIX)
    }

    /// Rewrite a linked-device alias to the canonical direct-user form.
    /// Any other address is returned unchanged.
    pub fn canonical(&self) -> Jid {
        if self.is_linked_alias() {
            Jid::user(self.bare())
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable per-logical-message identifier assigned by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_rewrites_to_direct_user() {
        let alias = Jid::new("254700000001@alias");
        assert!(alias.is_linked_alias());
        assert_eq!(alias.canonical(), Jid::user("254700000001"));
    }

    #[test]
    fn canonical_is_identity_for_groups_and_users() {
        let group = Jid::new("12345-67890@group");
        assert!(group.is_group());
        assert_eq!(group.canonical(), group);

        let user = Jid::user("254700000001");
        assert_eq!(user.canonical(), user);
        assert_eq!(user.bare(), "254700000001");
    }
}
