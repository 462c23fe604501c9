//! Push-to-talk coordinator.
//!
//! One presence channel per group. The local speaker offers audio to every
//! other member, each offer under a fresh session id; listeners answer the
//! offer addressed to them. The worker owns the roster, the floor record and
//! the negotiation table.

use super::adapter::{GroupListener, GroupSignaling};
use super::floor::FloorState;
use super::negotiation::{NegotiationInfo, NegotiationRole, NegotiationSession, NegotiationTable};
use super::roster::{Participant, Roster};
use crate::calls::channel_session::{ChannelSession, SubscriptionKind};
use crate::calls::error::CallError;
use crate::calls::events::{CallEvent, CallLogEntry, EventFanout, LogKind};
use crate::calls::sdp;
use crate::calls::worker::{self, WorkerHandle};
use crate::config::CallConfig;
use crate::relay::RelaySource;
use log::{debug, error, info, warn};
use rtccore::channel::{ChannelError, ChannelListener, SignalingChannel};
use rtccore::media::{
    ConnectionConfig, ConnectionObserver, IceCandidate, IceServer, MediaEngine, MediaError,
    PeerConnection, RemoteTrack, SessionDescription,
};
use rtccore::signaling::{CodecError, SignalBody, SignalingMessage};
use rtccore::types::{CallKind, ChannelName, SessionId, UserId};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const NO_ONE_HERE: &str = "No one here";

/// Read-only view of the push-to-talk coordinator.
#[derive(Debug, Clone, Default)]
pub struct GroupCallSnapshot {
    pub channel: Option<ChannelName>,
    pub joined: bool,
    pub floor: FloorState,
    pub participants: Vec<Participant>,
    pub negotiations: Vec<NegotiationInfo>,
    pub log: Vec<CallLogEntry>,
}

type Negotiated = Result<(Arc<dyn PeerConnection>, SessionDescription), MediaError>;

pub(crate) enum Command {
    Join(ChannelName),
    Joined {
        channel: ChannelName,
        result: Result<Vec<IceServer>, CallError>,
    },
    StartTalking,
    StopTalking,
    Signal {
        channel: ChannelName,
        message: SignalingMessage,
    },
    Members {
        channel: ChannelName,
        members: Vec<UserId>,
    },
    MemberAdded {
        channel: ChannelName,
        member: UserId,
    },
    MemberRemoved {
        channel: ChannelName,
        member: UserId,
    },
    TransportError {
        channel: ChannelName,
        message: String,
    },
    OfferReady {
        peer: UserId,
        session_id: SessionId,
        result: Negotiated,
    },
    AnswerReady {
        peer: UserId,
        session_id: SessionId,
        result: Negotiated,
    },
    RemoteAnswerApplied {
        peer: UserId,
        session_id: SessionId,
        result: Result<(), MediaError>,
    },
    IceApplied {
        peer: UserId,
        session_id: SessionId,
        result: Result<(), MediaError>,
    },
    LocalCandidate {
        peer: UserId,
        session_id: SessionId,
        candidate: IceCandidate,
    },
    RemoteTrack {
        peer: UserId,
        session_id: SessionId,
        track: RemoteTrack,
    },
    Leave(oneshot::Sender<()>),
}

/// Handle to a running push-to-talk coordinator.
#[derive(Clone)]
pub struct GroupCallCoordinator {
    worker: WorkerHandle<Command>,
    events: broadcast::Sender<CallEvent<FloorState>>,
    snapshots: watch::Receiver<GroupCallSnapshot>,
}

impl GroupCallCoordinator {
    /// Spawn the worker. Nothing is joined until [`join`](Self::join).
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: CallConfig,
        channel: Arc<dyn SignalingChannel>,
        media: Arc<dyn MediaEngine>,
        relay: Arc<dyn RelaySource>,
    ) -> Self {
        let (handle, rx) = worker::queue();

        let error_sink = handle.clone();
        let session = ChannelSession::new(
            channel,
            config.self_id.clone(),
            Arc::new(move |channel: ChannelName, e: ChannelError| {
                error_sink.post(Command::TransportError {
                    channel,
                    message: e.to_string(),
                });
            }),
        );
        let listener: Arc<dyn ChannelListener> =
            Arc::new(GroupListener::new(handle.clone(), config.self_id.clone()));
        let fanout = EventFanout::new(
            config.event_capacity,
            config.log_limit,
            GroupCallSnapshot::default(),
        );

        let coordinator = Self {
            worker: handle.clone(),
            events: fanout.event_sender(),
            snapshots: fanout.snapshot_receiver(),
        };

        let worker = GroupCallWorker {
            roster: Roster::new(config.self_id.clone()),
            config,
            media,
            relay,
            signaling: GroupSignaling::new(session),
            listener,
            handle,
            fanout,
            channel: None,
            joined: false,
            ice_servers: Vec::new(),
            floor: FloorState::Idle,
            negotiations: NegotiationTable::default(),
        };
        tokio::spawn(worker.run(rx));

        coordinator
    }

    fn post(&self, command: Command) -> Result<(), CallError> {
        if self.worker.post(command) {
            Ok(())
        } else {
            Err(CallError::Disposed)
        }
    }

    /// Join the push-to-talk channel. Ignored when a channel is already joined.
    pub fn join(&self, channel: ChannelName) -> Result<(), CallError> {
        self.post(Command::Join(channel))
    }

    /// Take the floor and offer audio to every member.
    pub fn start_talking(&self) -> Result<(), CallError> {
        self.post(Command::StartTalking)
    }

    /// Release the floor. No-op unless speaking.
    pub fn stop_talking(&self) -> Result<(), CallError> {
        self.post(Command::StopTalking)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent<FloorState>> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<GroupCallSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> GroupCallSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Stop talking, close every negotiation, leave the channel and stop the
    /// worker.
    pub async fn leave(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.worker.post(Command::Leave(done_tx)) {
            let _ = done_rx.await;
        }
    }
}

/// Posts engine callbacks for one negotiation back to the worker.
struct NegotiationObserver {
    worker: WorkerHandle<Command>,
    peer: UserId,
    session_id: SessionId,
}

impl ConnectionObserver for NegotiationObserver {
    fn on_local_ice_candidate(&self, candidate: IceCandidate) {
        self.worker.post(Command::LocalCandidate {
            peer: self.peer.clone(),
            session_id: self.session_id.clone(),
            candidate,
        });
    }

    fn on_remote_track(&self, track: RemoteTrack) {
        self.worker.post(Command::RemoteTrack {
            peer: self.peer.clone(),
            session_id: self.session_id.clone(),
            track,
        });
    }
}

struct GroupCallWorker {
    config: CallConfig,
    media: Arc<dyn MediaEngine>,
    relay: Arc<dyn RelaySource>,
    signaling: GroupSignaling,
    listener: Arc<dyn ChannelListener>,
    handle: WorkerHandle<Command>,
    fanout: EventFanout<FloorState, GroupCallSnapshot>,
    channel: Option<ChannelName>,
    joined: bool,
    ice_servers: Vec<IceServer>,
    floor: FloorState,
    roster: Roster,
    negotiations: NegotiationTable,
}

impl GroupCallWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!("Group call worker started for {}", self.config.self_id);
        let disposer = self.handle.clone();
        let _guard = scopeguard::guard((), move |_| disposer.dispose());

        while let Some(command) = rx.recv().await {
            if let Command::Leave(done) = command {
                self.leave().await;
                let _ = done.send(());
                break;
            }
            self.handle_command(command);
            self.publish_snapshot();
        }
        info!("Group call worker stopped for {}", self.config.self_id);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join(channel) => self.join(channel),
            Command::Joined { channel, result } => self.on_joined(channel, result),
            Command::StartTalking => self.start_talking(),
            Command::StopTalking => self.stop_talking(),
            Command::Signal { channel, message } => self.on_signal(channel, message),
            Command::Members { channel, members } => {
                if self.is_current(&channel) {
                    self.roster.seed(members);
                    self.fanout.log(
                        LogKind::Internal,
                        format!("{} other member(s) present", self.roster.ids().len()),
                    );
                }
            }
            Command::MemberAdded { channel, member } => {
                if self.is_current(&channel) {
                    self.on_member_added(member);
                }
            }
            Command::MemberRemoved { channel, member } => {
                if self.is_current(&channel) {
                    self.on_member_removed(member);
                }
            }
            Command::TransportError { channel, message } => {
                self.on_transport_error(channel, message)
            }
            Command::OfferReady {
                peer,
                session_id,
                result,
            } => self.on_offer_ready(peer, session_id, result),
            Command::AnswerReady {
                peer,
                session_id,
                result,
            } => self.on_answer_ready(peer, session_id, result),
            Command::RemoteAnswerApplied {
                peer,
                session_id,
                result,
            } => self.on_remote_answer_applied(peer, session_id, result),
            Command::IceApplied {
                peer,
                session_id,
                result,
            } => {
                if let Err(e) = result
                    && self.negotiations.get_mut(&peer, &session_id).is_some()
                {
                    warn!("Failed to apply candidate from {peer}: {e}");
                    self.fanout.log(LogKind::Error, e.to_string());
                }
            }
            Command::LocalCandidate {
                peer,
                session_id,
                candidate,
            } => self.on_local_candidate(peer, session_id, candidate),
            Command::RemoteTrack {
                peer,
                session_id,
                track,
            } => {
                if self.negotiations.get_mut(&peer, &session_id).is_some() {
                    self.fanout.log(
                        LogKind::Internal,
                        format!("Remote {:?} track from {peer}", track.kind),
                    );
                    self.fanout.emit(CallEvent::RemoteTrack { peer, track });
                }
            }
            Command::Leave(_) => {}
        }
    }

    fn is_current(&self, channel: &ChannelName) -> bool {
        self.channel.as_ref() == Some(channel)
    }

    fn set_floor(&mut self, floor: FloorState) {
        if self.floor != floor {
            self.floor = floor;
            self.fanout.emit(CallEvent::StateChanged(self.floor.clone()));
        }
    }

    fn join(&mut self, channel: ChannelName) {
        if let Some(current) = &self.channel {
            debug!("Ignoring join of {channel}: already on {current}");
            return;
        }
        info!("Joining {channel}");
        self.fanout
            .log(LogKind::Internal, format!("Joining {channel}"));
        self.channel = Some(channel.clone());

        let relay = self.relay.clone();
        let session = self.signaling.session().clone();
        let listener = self.listener.clone();
        let target = channel.clone();
        self.handle.spawn_completion(
            async move {
                let ice_servers = relay.fetch().await?;
                session
                    .subscribe(&target, SubscriptionKind::Presence, listener)
                    .await?;
                Ok::<_, CallError>(ice_servers)
            },
            move |result| Command::Joined { channel, result },
        );
    }

    fn on_joined(&mut self, channel: ChannelName, result: Result<Vec<IceServer>, CallError>) {
        if !self.is_current(&channel) {
            return;
        }
        match result {
            Ok(ice_servers) => {
                self.ice_servers = ice_servers;
                self.joined = true;
                info!("Joined {channel}");
                self.fanout
                    .log(LogKind::Internal, format!("Joined {channel}"));
            }
            Err(e) => {
                let message = match &e {
                    CallError::Relay(_) => "Failed to receive ice servers".to_string(),
                    _ => format!("Failed to join {channel}"),
                };
                error!("{message}: {e}");
                self.fanout
                    .log(LogKind::Error, format!("{message}: {e}"));
                self.channel = None;
                self.roster.clear();
                self.fanout.emit(CallEvent::Finished { message });
            }
        }
    }

    fn start_talking(&mut self) {
        let Some(channel) = self.channel.clone().filter(|_| self.joined) else {
            debug!("Ignoring start talking before joining");
            return;
        };
        if self.floor.is_speaking() {
            debug!("Ignoring start talking: already speaking");
            return;
        }
        if self.roster.is_empty() {
            info!("Nobody to talk to on {channel}");
            self.fanout.log(LogKind::Internal, NO_ONE_HERE);
            self.fanout.emit(CallEvent::Notice(NO_ONE_HERE.to_string()));
            return;
        }

        self.set_floor(FloorState::Speaking);
        sent(self.signaling.start_talk(&channel));
        self.fanout.log(LogKind::Outbound, "Start talk sent");
        for peer in self.roster.ids() {
            self.offer_to(peer);
        }
    }

    fn stop_talking(&mut self) {
        if !self.floor.is_speaking() {
            debug!("Ignoring stop talking: floor not held");
            return;
        }
        if let Some(channel) = &self.channel {
            sent(self.signaling.stop_talk(channel));
            self.fanout.log(LogKind::Outbound, "Stop talk sent");
        }
        for negotiation in self.negotiations.drain_role(NegotiationRole::Offerer) {
            negotiation.close();
        }
        self.set_floor(FloorState::Idle);
    }

    fn connection_config(&self, send_audio: bool) -> ConnectionConfig {
        ConnectionConfig {
            ice_servers: self.ice_servers.clone(),
            kind: CallKind::Audio,
            send_audio,
        }
    }

    fn observer(&self, peer: &UserId, session_id: &SessionId) -> Arc<dyn ConnectionObserver> {
        Arc::new(NegotiationObserver {
            worker: self.handle.clone(),
            peer: peer.clone(),
            session_id: session_id.clone(),
        })
    }

    /// Start a new offerer negotiation toward `peer`, replacing any other.
    fn offer_to(&mut self, peer: UserId) {
        let session_id = SessionId::generate();
        debug!("Offering to {peer} as {session_id}");
        if let Some(previous) = self
            .negotiations
            .insert(NegotiationSession::offerer(peer.clone(), session_id.clone()))
        {
            previous.close();
        }

        let media = self.media.clone();
        let config = self.connection_config(true);
        let observer = self.observer(&peer, &session_id);
        self.handle.spawn_completion(
            async move {
                let connection = media.create_connection(config, observer).await?;
                match sdp::local_offer(connection.clone()).await {
                    Ok(offer) => Ok((connection, offer)),
                    Err(e) => {
                        connection.close().await;
                        Err(e)
                    }
                }
            },
            move |result| Command::OfferReady {
                peer,
                session_id,
                result,
            },
        );
    }

    fn on_offer_ready(&mut self, peer: UserId, session_id: SessionId, result: Negotiated) {
        let Some(channel) = self.channel.clone() else {
            close_unclaimed(result);
            return;
        };
        let Some(negotiation) = self.negotiations.get_mut(&peer, &session_id) else {
            debug!("Dropping offer for superseded session {session_id}");
            close_unclaimed(result);
            return;
        };
        match result {
            Ok((connection, offer)) => {
                negotiation.attach(connection);
                sent(self.signaling.offer(&channel, &peer, &session_id, offer));
                for candidate in negotiation.open_local() {
                    sent(
                        self.signaling
                            .ice_candidate(&channel, &peer, &session_id, candidate),
                    );
                }
                self.fanout
                    .log(LogKind::Outbound, format!("Offer sent to {peer}"));
            }
            Err(e) => self.discard(&peer, &session_id, "Failed sending offer", &e),
        }
    }

    fn on_signal(&mut self, channel: ChannelName, message: SignalingMessage) {
        if !self.joined || !self.is_current(&channel) {
            debug!("Ignoring signal on {channel}");
            return;
        }
        if message.to.is_some() && !message.is_addressed_to(&self.config.self_id) {
            return;
        }
        let signal = message.signal_type();
        self.fanout.log(
            LogKind::Inbound,
            format!("{signal} received from {}", message.from),
        );

        match message.body {
            SignalBody::StartTalk => self.on_start_talk(message.from),
            SignalBody::StopTalk => self.on_stop_talk(message.from),
            SignalBody::Offer { description, .. } => {
                self.on_offer(message.from, message.session_id, description)
            }
            SignalBody::Answer { description } => {
                self.on_answer(message.from, message.session_id, description)
            }
            SignalBody::IceCandidate { candidate } => {
                self.on_remote_candidate(message.from, message.session_id, candidate)
            }
            SignalBody::Call { .. } | SignalBody::Decline { .. } | SignalBody::Busy { .. } => {
                debug!("Ignoring {signal} on group channel {channel}");
            }
        }
    }

    fn on_start_talk(&mut self, from: UserId) {
        if self.floor.is_speaking() {
            debug!("Ignoring start talk from {from} while speaking");
            return;
        }
        let mut floor = self.floor.clone();
        floor.record_remote(&from);
        self.roster.set_talking(&from, true);
        self.set_floor(floor);
    }

    fn on_stop_talk(&mut self, from: UserId) {
        self.roster.set_talking(&from, false);
        let mut floor = self.floor.clone();
        if floor.release_remote(&from) {
            self.set_floor(floor);
        }
        if let Some(negotiation) = self.negotiations.remove(&from) {
            negotiation.close();
        }
    }

    fn on_offer(
        &mut self,
        from: UserId,
        session_id: Option<SessionId>,
        description: SessionDescription,
    ) {
        if self.floor.is_speaking() {
            debug!("Ignoring offer from {from} while speaking");
            return;
        }
        if !self.roster.contains(&from) {
            debug!("Ignoring offer from non-member {from}");
            return;
        }
        let Some(session_id) = session_id else {
            debug!("Ignoring offer from {from} without a session id");
            return;
        };

        if let Some(previous) = self
            .negotiations
            .insert(NegotiationSession::answerer(from.clone(), session_id.clone()))
        {
            previous.close();
        }
        let mut floor = self.floor.clone();
        floor.record_remote(&from);
        self.roster.set_talking(&from, true);
        self.set_floor(floor);

        let media = self.media.clone();
        let config = self.connection_config(false);
        let observer = self.observer(&from, &session_id);
        self.handle.spawn_completion(
            async move {
                let connection = media.create_connection(config, observer).await?;
                match sdp::answer_offer(connection.clone(), description).await {
                    Ok(answer) => Ok((connection, answer)),
                    Err(e) => {
                        connection.close().await;
                        Err(e)
                    }
                }
            },
            move |result| Command::AnswerReady {
                peer: from,
                session_id,
                result,
            },
        );
    }

    fn on_answer_ready(&mut self, peer: UserId, session_id: SessionId, result: Negotiated) {
        let Some(channel) = self.channel.clone() else {
            close_unclaimed(result);
            return;
        };
        let Some(negotiation) = self.negotiations.get_mut(&peer, &session_id) else {
            debug!("Dropping answer for superseded session {session_id}");
            close_unclaimed(result);
            return;
        };
        match result {
            Ok((connection, answer)) => {
                negotiation.attach(connection);
                negotiation.mark_answered();
                sent(self.signaling.answer(&channel, &peer, &session_id, answer));
                for candidate in negotiation.open_local() {
                    sent(
                        self.signaling
                            .ice_candidate(&channel, &peer, &session_id, candidate),
                    );
                }
                let held = negotiation.take_remote();
                self.fanout
                    .log(LogKind::Outbound, format!("Answer sent to {peer}"));
                if let Some((connection, candidates)) = held {
                    self.apply_remote(peer, session_id, connection, candidates);
                }
            }
            Err(e) => self.discard(&peer, &session_id, "Failed answering offer", &e),
        }
    }

    fn on_answer(
        &mut self,
        from: UserId,
        session_id: Option<SessionId>,
        description: SessionDescription,
    ) {
        let Some(session_id) = session_id else {
            return;
        };
        let Some(negotiation) = self.negotiations.get_mut(&from, &session_id) else {
            debug!("Discarding answer from {from} for session {session_id}");
            return;
        };
        if negotiation.role() != NegotiationRole::Offerer {
            debug!("Discarding unexpected answer from {from}");
            return;
        }
        let Some(connection) = negotiation.connection() else {
            return;
        };
        if !negotiation.begin_answer() {
            debug!("Discarding repeated answer from {from} for session {session_id}");
            return;
        }

        self.handle.spawn_completion(
            async move { connection.set_remote_description(description).await },
            move |result| Command::RemoteAnswerApplied {
                peer: from,
                session_id,
                result,
            },
        );
    }

    fn on_remote_answer_applied(
        &mut self,
        peer: UserId,
        session_id: SessionId,
        result: Result<(), MediaError>,
    ) {
        let Some(negotiation) = self.negotiations.get_mut(&peer, &session_id) else {
            return;
        };
        match result {
            Ok(()) => {
                negotiation.mark_answered();
                let held = negotiation.take_remote();
                info!("Connected to {peer} as {session_id}");
                self.fanout
                    .log(LogKind::Internal, format!("Connected to {peer}"));
                if let Some((connection, candidates)) = held {
                    self.apply_remote(peer, session_id, connection, candidates);
                }
            }
            Err(e) => self.discard(&peer, &session_id, "Failed setting answer", &e),
        }
    }

    fn on_remote_candidate(
        &mut self,
        from: UserId,
        session_id: Option<SessionId>,
        candidate: IceCandidate,
    ) {
        let Some(session_id) = session_id else {
            return;
        };
        let Some(negotiation) = self.negotiations.get_mut(&from, &session_id) else {
            debug!("Discarding candidate from {from} for session {session_id}");
            return;
        };
        negotiation.buffer_remote(candidate);
        if let Some((connection, candidates)) = negotiation.take_remote() {
            self.apply_remote(from, session_id, connection, candidates);
        }
    }

    fn apply_remote(
        &self,
        peer: UserId,
        session_id: SessionId,
        connection: Arc<dyn PeerConnection>,
        candidates: Vec<IceCandidate>,
    ) {
        self.handle.spawn_completion(
            async move {
                for candidate in candidates {
                    connection.add_ice_candidate(candidate).await?;
                }
                Ok(())
            },
            move |result| Command::IceApplied {
                peer,
                session_id,
                result,
            },
        );
    }

    fn on_local_candidate(&mut self, peer: UserId, session_id: SessionId, candidate: IceCandidate) {
        let Some(channel) = self.channel.as_ref() else {
            return;
        };
        let Some(negotiation) = self.negotiations.get_mut(&peer, &session_id) else {
            return;
        };
        if let Some(candidate) = negotiation.push_local(candidate) {
            sent(
                self.signaling
                    .ice_candidate(channel, &peer, &session_id, candidate),
            );
        }
    }

    fn on_member_added(&mut self, member: UserId) {
        if !self.roster.add(member.clone()) {
            return;
        }
        self.fanout
            .log(LogKind::Internal, format!("{member} joined"));
        if self.floor.is_speaking() {
            self.offer_to(member);
        }
    }

    fn on_member_removed(&mut self, member: UserId) {
        if !self.roster.remove(&member) {
            return;
        }
        self.fanout.log(LogKind::Internal, format!("{member} left"));
        if let Some(negotiation) = self.negotiations.remove(&member) {
            negotiation.close();
        }
        let mut floor = self.floor.clone();
        if floor.release_remote(&member) {
            self.set_floor(floor);
        }
    }

    fn on_transport_error(&mut self, channel: ChannelName, message: String) {
        error!("Signaling failure on {channel}: {message}");
        self.fanout.log(LogKind::Error, message.clone());
        if !self.is_current(&channel) {
            return;
        }
        if self.floor.is_speaking() {
            sent(self.signaling.stop_talk(&channel));
        }
        self.close_session();
        self.fanout.emit(CallEvent::Finished { message });
    }

    /// Drop one negotiation after a media failure. The rest of the mesh stays.
    fn discard(
        &mut self,
        peer: &UserId,
        session_id: &SessionId,
        message: &str,
        error: &dyn std::fmt::Display,
    ) {
        warn!("{message} for {peer} ({session_id}): {error}");
        self.fanout
            .log(LogKind::Error, format!("{message} for {peer}: {error}"));
        if let Some(negotiation) = self.negotiations.remove_matching(peer, session_id) {
            negotiation.close();
        }
    }

    /// Close every negotiation and forget the channel.
    fn close_session(&mut self) {
        for negotiation in self.negotiations.drain() {
            negotiation.close();
        }
        if let Some(channel) = self.channel.take() {
            self.signaling.session().unsubscribe(&channel);
            info!("Left {channel}");
        }
        self.joined = false;
        self.roster.clear();
        self.set_floor(FloorState::Idle);
    }

    async fn leave(&mut self) {
        self.stop_talking();
        let was_joined = self.channel.is_some();
        self.close_session();
        self.signaling.session().close().await;
        self.handle.dispose();
        if was_joined {
            self.fanout.log(LogKind::Internal, "Call ended");
            self.fanout.emit(CallEvent::Finished {
                message: "Call ended".to_string(),
            });
        }
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        self.fanout.publish(GroupCallSnapshot {
            channel: self.channel.clone(),
            joined: self.joined,
            floor: self.floor.clone(),
            participants: self.roster.participants(),
            negotiations: self.negotiations.infos(),
            log: self.fanout.log_entries(),
        });
    }
}

fn close_unclaimed(result: Negotiated) {
    if let Ok((connection, _)) = result {
        tokio::spawn(async move { connection.close().await });
    }
}

fn sent(result: Result<(), CodecError>) {
    if let Err(e) = result {
        warn!("Failed to encode signal: {e}");
    }
}
