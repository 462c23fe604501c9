use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Media kind of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CallKind {
    #[default]
    #[serde(rename = "voice")]
    Audio,
    #[serde(rename = "video")]
    Video,
}

impl CallKind {
    /// Wire name, as carried in call attempts and offers.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "voice",
            Self::Video => "video",
        }
    }

    pub const fn has_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "voice" | "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(format!("unknown call kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}
