//! Push-to-talk signaling on the shared group channel.

use super::coordinator::Command;
use crate::calls::channel_session::ChannelSession;
use crate::calls::worker::WorkerHandle;
use log::{debug, warn};
use rtccore::channel::ChannelListener;
use rtccore::media::{IceCandidate, SessionDescription};
use rtccore::signaling::{CodecError, SignalingMessage};
use rtccore::types::{CallKind, ChannelName, SessionId, UserId};

#[derive(Clone)]
pub(crate) struct GroupSignaling {
    session: ChannelSession,
}

impl GroupSignaling {
    pub(crate) fn new(session: ChannelSession) -> Self {
        Self { session }
    }

    pub(crate) fn session(&self) -> &ChannelSession {
        &self.session
    }

    fn me(&self) -> UserId {
        self.session.self_id().clone()
    }

    pub(crate) fn start_talk(&self, channel: &ChannelName) -> Result<(), CodecError> {
        self.session
            .publish(channel, &SignalingMessage::start_talk(self.me()))
    }

    pub(crate) fn stop_talk(&self, channel: &ChannelName) -> Result<(), CodecError> {
        self.session
            .publish(channel, &SignalingMessage::stop_talk(self.me()))
    }

    pub(crate) fn offer(
        &self,
        channel: &ChannelName,
        peer: &UserId,
        session_id: &SessionId,
        description: SessionDescription,
    ) -> Result<(), CodecError> {
        let message = SignalingMessage::offer(
            self.me(),
            peer.clone(),
            session_id.clone(),
            CallKind::Audio,
            description,
        );
        self.session.publish(channel, &message)
    }

    pub(crate) fn answer(
        &self,
        channel: &ChannelName,
        peer: &UserId,
        session_id: &SessionId,
        description: SessionDescription,
    ) -> Result<(), CodecError> {
        let message =
            SignalingMessage::answer(self.me(), peer.clone(), session_id.clone(), description);
        self.session.publish(channel, &message)
    }

    pub(crate) fn ice_candidate(
        &self,
        channel: &ChannelName,
        peer: &UserId,
        session_id: &SessionId,
        candidate: IceCandidate,
    ) -> Result<(), CodecError> {
        let message =
            SignalingMessage::ice_candidate(self.me(), peer.clone(), session_id.clone(), candidate);
        self.session.publish(channel, &message)
    }
}

pub(crate) struct GroupListener {
    worker: WorkerHandle<Command>,
    self_id: UserId,
}

impl GroupListener {
    pub(crate) fn new(worker: WorkerHandle<Command>, self_id: UserId) -> Self {
        Self { worker, self_id }
    }
}

impl ChannelListener for GroupListener {
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
        self.worker.post(Command::Members {
            channel: channel.clone(),
            members,
        });
    }

    fn on_member_added(&self, channel: &ChannelName, member: UserId) {
        if member != self.self_id {
            self.worker.post(Command::MemberAdded {
                channel: channel.clone(),
                member,
            });
        }
    }

    fn on_member_removed(&self, channel: &ChannelName, member: UserId) {
        if member != self.self_id {
            self.worker.post(Command::MemberRemoved {
                channel: channel.clone(),
                member,
            });
        }
    }

    fn on_error(&self, channel: &ChannelName, message: String) {
        self.worker.post(Command::TransportError {
            channel: channel.clone(),
            message,
        });
    }
}
