//! Direct-call signaling: outbound messages and the inbound channel listener.

use super::coordinator::Command;
use super::state::CallSession;
use crate::calls::channel_session::ChannelSession;
use crate::calls::worker::WorkerHandle;
use log::{debug, warn};
use rtccore::channel::ChannelListener;
use rtccore::media::{IceCandidate, SessionDescription};
use rtccore::signaling::{CodecError, SignalType, SignalingMessage};
use rtccore::types::{ChannelName, UserId};

#[derive(Clone)]
pub(crate) struct DirectSignaling {
    session: ChannelSession,
}

impl DirectSignaling {
    pub(crate) fn new(session: ChannelSession) -> Self {
        Self { session }
    }

    pub(crate) fn session(&self) -> &ChannelSession {
        &self.session
    }

    fn me(&self) -> UserId {
        self.session.self_id().clone()
    }

    /// Ring `call.peer` through their private channel.
    pub(crate) fn call_attempt(&self, call: &CallSession) -> Result<(), CodecError> {
        let message =
            SignalingMessage::call(self.me(), call.peer.clone(), call.channel.clone(), call.kind);
        self.session
            .publish(&ChannelName::private_for(&call.peer), &message)
    }

    pub(crate) fn decline(&self, call: &CallSession) -> Result<(), CodecError> {
        let message =
            SignalingMessage::decline(self.me(), call.peer.clone(), call.channel.clone());
        self.session
            .publish(&ChannelName::private_for(&call.peer), &message)
    }

    /// Tell `caller` we are in another call. `channel` is the one they offered.
    pub(crate) fn busy(&self, caller: &UserId, channel: &ChannelName) -> Result<(), CodecError> {
        let message = SignalingMessage::busy(self.me(), caller.clone(), channel.clone());
        self.session
            .publish(&ChannelName::private_for(caller), &message)
    }

    pub(crate) fn offer(
        &self,
        call: &CallSession,
        description: SessionDescription,
    ) -> Result<(), CodecError> {
        let Some(session_id) = call.session_id.clone() else {
            return Err(CodecError::MissingSessionId(SignalType::Offer));
        };
        let message = SignalingMessage::offer(
            self.me(),
            call.peer.clone(),
            session_id,
            call.kind,
            description,
        );
        self.session.publish(&call.channel, &message)
    }

    pub(crate) fn answer(
        &self,
        call: &CallSession,
        description: SessionDescription,
    ) -> Result<(), CodecError> {
        let Some(session_id) = call.session_id.clone() else {
            return Err(CodecError::MissingSessionId(SignalType::Answer));
        };
        let message =
            SignalingMessage::answer(self.me(), call.peer.clone(), session_id, description);
        self.session.publish(&call.channel, &message)
    }

    pub(crate) fn ice_candidate(
        &self,
        call: &CallSession,
        candidate: IceCandidate,
    ) -> Result<(), CodecError> {
        let Some(session_id) = call.session_id.clone() else {
            return Err(CodecError::MissingSessionId(SignalType::IceCandidate));
        };
        let message =
            SignalingMessage::ice_candidate(self.me(), call.peer.clone(), session_id, candidate);
        self.session.publish(&call.channel, &message)
    }
}

/// Decodes channel traffic and queues it on the direct-call worker.
pub(crate) struct DirectListener {
    worker: WorkerHandle<Command>,
    self_id: UserId,
}

impl DirectListener {
    pub(crate) fn new(worker: WorkerHandle<Command>, self_id: UserId) -> Self {
        Self { worker, self_id }
    }
}

impl ChannelListener for DirectListener {
    fn on_event(&self, channel: &ChannelName, event: &str, payload: &str) {
        let message = match SignalingMessage::decode(event, payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable {event} on {channel}: {e}");
                return;
            }
        };
        if message.from == self.self_id {
            debug!("Ignoring own {} echoed on {channel}", message.signal_type());
            return;
        }
        self.worker.post(Command::Signal {
            channel: channel.clone(),
            message,
        });
    }

    fn on_members(&self, channel: &ChannelName, members: Vec<UserId>) {
        for member in members.into_iter().filter(|m| *m != self.self_id) {
            self.worker.post(Command::MemberAdded {
                channel: channel.clone(),
                member,
            });
        }
    }

    fn on_member_added(&self, channel: &ChannelName, member: UserId) {
        self.worker.post(Command::MemberAdded {
            channel: channel.clone(),
            member,
        });
    }

    fn on_member_removed(&self, channel: &ChannelName, member: UserId) {
        self.worker.post(Command::MemberRemoved {
            channel: channel.clone(),
            member,
        });
    }

    fn on_error(&self, channel: &ChannelName, message: String) {
        self.worker.post(Command::TransportError {
            channel: channel.clone(),
            message,
        });
    }
}
