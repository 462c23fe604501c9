//! Signal type definitions.
//!
//! The `type` field of every payload carries one of these names. Each type is
//! published under a fixed transport event name.

use std::fmt;

/// Call attempt notice, pushed to the callee's private channel.
pub const EVENT_CALL: &str = "rtc-call";
/// Decline and busy notices, pushed to the counterpart's private channel.
pub const EVENT_CALL_DECLINE: &str = "rtc-call-decline";
/// Offer / answer / ICE exchange on presence channels.
pub const EVENT_CLIENT_RTC: &str = "client-rtc";
/// Floor notices on push-to-talk channels.
pub const EVENT_GROUP_TALK: &str = "client-group-talk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
    /// Call attempt. Carries the presence channel to meet on and the call kind.
    Call,

    /// SDP offer for one negotiation attempt.
    Offer,

    /// SDP answer, tagged with the offer's session id.
    Answer,

    /// One trickled ICE candidate.
    IceCandidate,

    /// The call was declined or hung up.
    Decline,

    /// The callee is in another call.
    Busy,

    /// A participant claimed the floor.
    StartTalk,

    /// A participant released the floor.
    StopTalk,
}

impl SignalType {
    pub const ALL: [SignalType; 8] = [
        Self::Call,
        Self::Offer,
        Self::Answer,
        Self::IceCandidate,
        Self::Decline,
        Self::Busy,
        Self::StartTalk,
        Self::StopTalk,
    ];

    /// Name carried in the payload's `type` field.
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Offer => "OFFER",
            Self::Answer => "ANSWER",
            Self::IceCandidate => "ICE_CANDIDATE",
            Self::Decline => "DECLINE",
            Self::Busy => "BUSY",
            Self::StartTalk => "START_TALK",
            Self::StopTalk => "STOP_TALK",
        }
    }

    /// Parse from the wire name (case-insensitive).
    pub fn from_wire(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "CALL" => Some(Self::Call),
            "OFFER" => Some(Self::Offer),
            "ANSWER" => Some(Self::Answer),
            "ICE_CANDIDATE" => Some(Self::IceCandidate),
            "DECLINE" => Some(Self::Decline),
            "BUSY" => Some(Self::Busy),
            "START_TALK" => Some(Self::StartTalk),
            "STOP_TALK" => Some(Self::StopTalk),
            _ => None,
        }
    }

    /// Transport event this type is published under.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Call => EVENT_CALL,
            Self::Decline | Self::Busy => EVENT_CALL_DECLINE,
            Self::Offer | Self::Answer | Self::IceCandidate => EVENT_CLIENT_RTC,
            Self::StartTalk | Self::StopTalk => EVENT_GROUP_TALK,
        }
    }

    /// Whether this type belongs to a negotiation and must carry a session id.
    pub const fn is_negotiation(&self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::IceCandidate)
    }

    /// Floor notices are addressed to the whole channel.
    pub const fn is_floor_notice(&self) -> bool {
        matches!(self, Self::StartTalk | Self::StopTalk)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}
