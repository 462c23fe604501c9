//! Direct call state machine implementation.

use chrono::{DateTime, Utc};
use rtccore::types::{CallDirection, CallKind, ChannelName, SessionId, UserId};
use serde::Serialize;

/// Current state of a direct call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum DirectCallState {
    /// No call.
    #[default]
    None,
    /// Outgoing call: fetching relays and preparing the connection.
    InitializingOut,
    /// Incoming call: fetching relays and preparing the connection.
    InitializingIn,
    /// Outgoing call: attempt sent, waiting for the callee to join.
    CallingOut,
    /// Incoming call: ringing locally.
    CallingIn,
    CreatingOffer,
    AwaitingOffer,
    AwaitingAnswer,
    SettingOffer,
    SettingAnswer,
    CreatingAnswer,
    CallRunning,
}

impl DirectCallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::CallRunning)
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::CallingOut | Self::CallingIn)
    }

    /// Whether the offer/answer exchange has started.
    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            Self::CreatingOffer
                | Self::AwaitingOffer
                | Self::AwaitingAnswer
                | Self::SettingOffer
                | Self::SettingAnswer
                | Self::CreatingAnswer
        )
    }
}

/// State transitions for direct calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectTransition {
    Place,
    Receive,
    /// Connection and subscriptions are ready.
    Prepared,
    LocalAnswered,
    PeerJoined,
    OfferSent,
    OfferReceived,
    OfferApplied,
    AnswerSent,
    AnswerReceived,
    AnswerApplied,
    Ended,
}

/// Full direct call session information.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub self_id: UserId,
    pub peer: UserId,
    pub kind: CallKind,
    /// Presence channel the two ends meet on.
    pub channel: ChannelName,
    pub direction: CallDirection,
    pub state: DirectCallState,
    pub created_at: DateTime<Utc>,
    /// Minted by the caller with the offer, adopted by the callee from it.
    pub session_id: Option<SessionId>,
    /// Local attempt counter; completions tagged with another attempt are stale.
    pub attempt: u64,
    pub audio_enabled: bool,
}

impl CallSession {
    pub fn new_outgoing(self_id: UserId, peer: UserId, kind: CallKind, attempt: u64) -> Self {
        let channel = ChannelName::direct_call(&self_id, &peer);
        Self {
            self_id,
            peer,
            kind,
            channel,
            direction: CallDirection::Outgoing,
            state: DirectCallState::None,
            created_at: Utc::now(),
            session_id: None,
            attempt,
            audio_enabled: true,
        }
    }

    pub fn new_incoming(
        self_id: UserId,
        peer: UserId,
        kind: CallKind,
        channel: ChannelName,
        attempt: u64,
    ) -> Self {
        Self {
            self_id,
            peer,
            kind,
            channel,
            direction: CallDirection::Incoming,
            state: DirectCallState::None,
            created_at: Utc::now(),
            session_id: None,
            attempt,
            audio_enabled: true,
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.direction == CallDirection::Outgoing
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(
        &mut self,
        transition: DirectTransition,
    ) -> Result<DirectCallState, InvalidTransition> {
        use DirectCallState as S;
        use DirectTransition as T;

        let new_state = match (self.state, transition) {
            (S::None, T::Place) => S::InitializingOut,
            (S::None, T::Receive) => S::InitializingIn,
            (S::InitializingOut, T::Prepared) => S::CallingOut,
            (S::InitializingIn, T::Prepared) => S::CallingIn,
            (S::CallingIn, T::LocalAnswered) => S::AwaitingOffer,
            (S::CallingOut, T::PeerJoined) => S::CreatingOffer,
            (S::CreatingOffer, T::OfferSent) => S::AwaitingAnswer,
            (S::AwaitingOffer, T::OfferReceived) => S::SettingOffer,
            (S::SettingOffer, T::OfferApplied) => S::CreatingAnswer,
            (S::CreatingAnswer, T::AnswerSent) => S::CallRunning,
            (S::AwaitingAnswer, T::AnswerReceived) => S::SettingAnswer,
            (S::SettingAnswer, T::AnswerApplied) => S::CallRunning,
            (current, T::Ended) if current != S::None => S::None,
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.state = new_state;
        Ok(new_state)
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
