//! Signaling message model and JSON codec.
//!
//! Every payload shares one envelope:
//! ```json
//! { "type": "OFFER",
//!   "time": 1700000000000,
//!   "sessionId": "8c7d...-...",
//!   "data": { "from": "alice", "to": "bob", "type": "voice",
//!             "description": { "type": "offer", "sdp": "v=0..." } } }
//! ```
//! `sessionId` is present only on offers, answers and ICE candidates.

use super::signal_type::SignalType;
use crate::media::{IceCandidate, SessionDescription};
use crate::types::{CallKind, ChannelName, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown signal type: {0}")]
    UnknownType(String),

    #[error("{signal} is not expected on event {event}")]
    UnexpectedEvent { event: String, signal: SignalType },

    #[error("{0} requires a session id")]
    MissingSessionId(SignalType),

    #[error("{signal} is missing field {field}")]
    MissingField {
        signal: SignalType,
        field: &'static str,
    },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Type-specific content of a signaling message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalBody {
    Call {
        channel: ChannelName,
        kind: CallKind,
    },
    Offer {
        kind: Option<CallKind>,
        description: SessionDescription,
    },
    Answer {
        description: SessionDescription,
    },
    IceCandidate {
        candidate: IceCandidate,
    },
    Decline {
        channel: Option<ChannelName>,
    },
    Busy {
        channel: Option<ChannelName>,
    },
    StartTalk,
    StopTalk,
}

impl SignalBody {
    pub const fn signal_type(&self) -> SignalType {
        match self {
            Self::Call { .. } => SignalType::Call,
            Self::Offer { .. } => SignalType::Offer,
            Self::Answer { .. } => SignalType::Answer,
            Self::IceCandidate { .. } => SignalType::IceCandidate,
            Self::Decline { .. } => SignalType::Decline,
            Self::Busy { .. } => SignalType::Busy,
            Self::StartTalk => SignalType::StartTalk,
            Self::StopTalk => SignalType::StopTalk,
        }
    }
}

/// A decoded signaling message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    pub from: UserId,
    /// Recipient. `None` for channel-wide floor notices.
    pub to: Option<UserId>,
    pub time: DateTime<Utc>,
    pub session_id: Option<SessionId>,
    pub body: SignalBody,
}

/// Event name and serialized payload, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSignal {
    pub event: &'static str,
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    signal: String,
    time: i64,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
    data: WireData,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireData {
    from: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<UserId>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<CallKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<ChannelName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<IceCandidate>,
}

impl SignalingMessage {
    fn new(from: UserId, to: Option<UserId>, session_id: Option<SessionId>, body: SignalBody) -> Self {
        Self {
            from,
            to,
            time: Utc::now(),
            session_id,
            body,
        }
    }

    pub fn call(from: UserId, to: UserId, channel: ChannelName, kind: CallKind) -> Self {
        Self::new(from, Some(to), None, SignalBody::Call { channel, kind })
    }

    pub fn offer(
        from: UserId,
        to: UserId,
        session_id: SessionId,
        kind: CallKind,
        description: SessionDescription,
    ) -> Self {
        Self::new(
            from,
            Some(to),
            Some(session_id),
            SignalBody::Offer {
                kind: Some(kind),
                description,
            },
        )
    }

    pub fn answer(
        from: UserId,
        to: UserId,
        session_id: SessionId,
        description: SessionDescription,
    ) -> Self {
        Self::new(from, Some(to), Some(session_id), SignalBody::Answer { description })
    }

    pub fn ice_candidate(
        from: UserId,
        to: UserId,
        session_id: SessionId,
        candidate: IceCandidate,
    ) -> Self {
        Self::new(
            from,
            Some(to),
            Some(session_id),
            SignalBody::IceCandidate { candidate },
        )
    }

    pub fn decline(from: UserId, to: UserId, channel: ChannelName) -> Self {
        Self::new(
            from,
            Some(to),
            None,
            SignalBody::Decline {
                channel: Some(channel),
            },
        )
    }

    pub fn busy(from: UserId, to: UserId, channel: ChannelName) -> Self {
        Self::new(
            from,
            Some(to),
            None,
            SignalBody::Busy {
                channel: Some(channel),
            },
        )
    }

    pub fn start_talk(from: UserId) -> Self {
        Self::new(from, None, None, SignalBody::StartTalk)
    }

    pub fn stop_talk(from: UserId) -> Self {
        Self::new(from, None, None, SignalBody::StopTalk)
    }

    pub const fn signal_type(&self) -> SignalType {
        self.body.signal_type()
    }

    /// Whether the message names `user` as its recipient.
    pub fn is_addressed_to(&self, user: &UserId) -> bool {
        self.to.as_ref() == Some(user)
    }

    pub fn encode(&self) -> Result<EncodedSignal, CodecError> {
        let signal = self.signal_type();
        if signal.is_negotiation() && self.session_id.is_none() {
            return Err(CodecError::MissingSessionId(signal));
        }

        let mut data = WireData {
            from: self.from.clone(),
            to: self.to.clone(),
            ..Default::default()
        };
        match &self.body {
            SignalBody::Call { channel, kind } => {
                data.channel = Some(channel.clone());
                data.kind = Some(*kind);
            }
            SignalBody::Offer { kind, description } => {
                data.kind = *kind;
                data.description = Some(description.clone());
            }
            SignalBody::Answer { description } => {
                data.description = Some(description.clone());
            }
            SignalBody::IceCandidate { candidate } => {
                data.candidate = Some(candidate.clone());
            }
            SignalBody::Decline { channel } | SignalBody::Busy { channel } => {
                data.channel.clone_from(channel);
            }
            SignalBody::StartTalk | SignalBody::StopTalk => {}
        }

        let envelope = WireEnvelope {
            signal: signal.wire_name().to_string(),
            time: self.time.timestamp_millis(),
            session_id: self.session_id.clone(),
            data,
        };

        Ok(EncodedSignal {
            event: signal.event_name(),
            payload: serde_json::to_string(&envelope)?,
        })
    }

    /// Decode a payload received under transport event `event`.
    pub fn decode(event: &str, payload: &str) -> Result<Self, CodecError> {
        let envelope: WireEnvelope = serde_json::from_str(payload)?;
        let signal = SignalType::from_wire(&envelope.signal)
            .ok_or_else(|| CodecError::UnknownType(envelope.signal.clone()))?;

        if signal.event_name() != event {
            return Err(CodecError::UnexpectedEvent {
                event: event.to_string(),
                signal,
            });
        }
        if signal.is_negotiation() && envelope.session_id.is_none() {
            return Err(CodecError::MissingSessionId(signal));
        }

        let time = DateTime::from_timestamp_millis(envelope.time)
            .ok_or(CodecError::InvalidTimestamp(envelope.time))?;

        let data = envelope.data;
        let missing = |field| CodecError::MissingField { signal, field };

        let body = match signal {
            SignalType::Call => SignalBody::Call {
                channel: data.channel.ok_or_else(|| missing("channel"))?,
                kind: data.kind.ok_or_else(|| missing("type"))?,
            },
            SignalType::Offer => SignalBody::Offer {
                kind: data.kind,
                description: data.description.ok_or_else(|| missing("description"))?,
            },
            SignalType::Answer => SignalBody::Answer {
                description: data.description.ok_or_else(|| missing("description"))?,
            },
            SignalType::IceCandidate => SignalBody::IceCandidate {
                candidate: data.candidate.ok_or_else(|| missing("candidate"))?,
            },
            SignalType::Decline => SignalBody::Decline {
                channel: data.channel,
            },
            SignalType::Busy => SignalBody::Busy {
                channel: data.channel,
            },
            SignalType::StartTalk => SignalBody::StartTalk,
            SignalType::StopTalk => SignalBody::StopTalk,
        };

        Ok(Self {
            from: data.from,
            to: data.to,
            time,
            session_id: envelope.session_id,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserId {
        "alice".into()
    }

    fn bob() -> UserId {
        "bob".into()
    }

    #[test]
    fn test_offer_wire_shape() {
        let session_id = SessionId::generate();
        let msg = SignalingMessage::offer(
            alice(),
            bob(),
            session_id.clone(),
            CallKind::Video,
            SessionDescription::offer("v=0\r\n"),
        );
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded.event, "client-rtc");

        let json: serde_json::Value = serde_json::from_str(&encoded.payload).unwrap();
        assert_eq!(json["type"], "OFFER");
        assert_eq!(json["sessionId"], session_id.as_str());
        assert_eq!(json["data"]["from"], "alice");
        assert_eq!(json["data"]["to"], "bob");
        assert_eq!(json["data"]["type"], "video");
        assert_eq!(json["data"]["description"]["type"], "offer");
        assert!(json["time"].as_i64().unwrap() > 0);

        let decoded = SignalingMessage::decode(encoded.event, &encoded.payload).unwrap();
        assert_eq!(decoded.session_id, Some(session_id));
        assert_eq!(decoded.body, msg.body);
        assert_eq!(decoded.time.timestamp_millis(), msg.time.timestamp_millis());
    }

    #[test]
    fn test_floor_notice_has_no_recipient_or_session() {
        let encoded = SignalingMessage::start_talk(alice()).encode().unwrap();
        assert_eq!(encoded.event, "client-group-talk");

        let json: serde_json::Value = serde_json::from_str(&encoded.payload).unwrap();
        assert_eq!(json["type"], "START_TALK");
        assert!(json.get("sessionId").is_none());
        assert!(json["data"].get("to").is_none());
    }

    #[test]
    fn test_decode_ice_from_browser_peer() {
        let payload = r#"{"type":"ICE_CANDIDATE","time":1700000000000,"sessionId":"s-1",
            "data":{"from":"bob","to":"alice",
            "candidate":{"candidate":"candidate:1 1 UDP 1 10.0.0.3 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}}"#;
        let msg = SignalingMessage::decode("client-rtc", payload).unwrap();

        assert!(msg.is_addressed_to(&alice()));
        match msg.body {
            SignalBody::IceCandidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_busy_uses_decline_event() {
        let encoded = SignalingMessage::busy(bob(), alice(), "presence-alice-bob".into())
            .encode()
            .unwrap();
        assert_eq!(encoded.event, "rtc-call-decline");
        let decoded = SignalingMessage::decode(encoded.event, &encoded.payload).unwrap();
        assert_eq!(decoded.signal_type(), SignalType::Busy);
    }

    #[test]
    fn test_negotiation_without_session_is_rejected() {
        let payload = r#"{"type":"ANSWER","time":1700000000000,
            "data":{"from":"bob","to":"alice","description":{"type":"answer","sdp":"v=0"}}}"#;
        assert!(matches!(
            SignalingMessage::decode("client-rtc", payload),
            Err(CodecError::MissingSessionId(SignalType::Answer))
        ));
    }

    #[test]
    fn test_wrong_event_is_rejected() {
        let encoded = SignalingMessage::stop_talk(alice()).encode().unwrap();
        assert!(matches!(
            SignalingMessage::decode("client-rtc", &encoded.payload),
            Err(CodecError::UnexpectedEvent { .. })
        ));
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let payload = r#"{"type":"CALL","time":1700000000000,"data":{"from":"alice","to":"bob"}}"#;
        assert!(matches!(
            SignalingMessage::decode("rtc-call", payload),
            Err(CodecError::MissingField {
                field: "channel",
                ..
            })
        ));

        assert!(matches!(
            SignalingMessage::decode("rtc-call", r#"{"type":"RING","time":1,"data":{"from":"a"}}"#),
            Err(CodecError::UnknownType(_))
        ));
        assert!(matches!(
            SignalingMessage::decode("rtc-call", "not json"),
            Err(CodecError::Json(_))
        ));
    }
}
