use serde::{Deserialize, Serialize};
use std::fmt;

const PRIVATE_PREFIX: &str = "private-";
const PRESENCE_PREFIX: &str = "presence-";

/// Identity of a call participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Name of a pub/sub channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Private mailbox of `user`.
    ///
    /// Ids that already carry the `private-` prefix are used verbatim.
    pub fn private_for(user: &UserId) -> Self {
        if user.as_str().starts_with(PRIVATE_PREFIX) {
            Self(user.as_str().to_string())
        } else {
            Self(format!("{PRIVATE_PREFIX}{user}"))
        }
    }

    /// Presence channel shared by the two ends of a direct call.
    pub fn direct_call(caller: &UserId, callee: &UserId) -> Self {
        Self(format!("{PRESENCE_PREFIX}{caller}-{callee}"))
    }

    pub fn is_private(&self) -> bool {
        self.0.starts_with(PRIVATE_PREFIX)
    }

    pub fn is_presence(&self) -> bool {
        self.0.starts_with(PRESENCE_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_channel_name() {
        assert_eq!(
            ChannelName::private_for(&"alice".into()).as_str(),
            "private-alice"
        );
        // Already prefixed ids are not prefixed twice
        assert_eq!(
            ChannelName::private_for(&"private-alice".into()).as_str(),
            "private-alice"
        );
        assert!(ChannelName::private_for(&"bob".into()).is_private());
    }

    #[test]
    fn test_direct_call_channel_name() {
        let name = ChannelName::direct_call(&"alice".into(), &"bob".into());
        assert_eq!(name.as_str(), "presence-alice-bob");
        assert!(name.is_presence());
        assert!(!name.is_private());
    }
}
