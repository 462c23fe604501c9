//! Direct call coordinator.
//!
//! Owns at most one [`CallSession`] and the peer connection that belongs to
//! it. All mutation happens on the worker task; [`DirectCallCoordinator`] is
//! a cheap handle that posts intents and exposes snapshots and events.

use super::adapter::{DirectListener, DirectSignaling};
use super::state::{CallSession, DirectCallState, DirectTransition};
use crate::calls::candidates::CandidateBuffer;
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
    ConnectionConfig, ConnectionObserver, IceCandidate, MediaEngine, MediaError, PeerConnection,
    RemoteTrack, SessionDescription,
};
use rtccore::signaling::{CodecError, SignalBody, SignalingMessage};
use rtccore::types::{CallKind, ChannelName, SessionId, UserId};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Read-only view of the direct call coordinator.
#[derive(Debug, Clone, Default)]
pub struct DirectCallSnapshot {
    pub state: DirectCallState,
    pub call: Option<CallSession>,
    pub log: Vec<CallLogEntry>,
}

pub(crate) enum Command {
    Listen,
    PlaceCall {
        peer: UserId,
        kind: CallKind,
    },
    ReceiveCall {
        peer: UserId,
        kind: CallKind,
        channel: ChannelName,
    },
    Answer,
    Decline,
    SetAudioEnabled(bool),
    Signal {
        channel: ChannelName,
        message: SignalingMessage,
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
    Listening(Result<(), CallError>),
    Prepared {
        attempt: u64,
        result: Result<Arc<dyn PeerConnection>, CallError>,
    },
    PresenceJoined {
        attempt: u64,
        result: Result<(), CallError>,
    },
    OfferCreated {
        attempt: u64,
        result: Result<SessionDescription, MediaError>,
    },
    OfferApplied {
        attempt: u64,
        result: Result<(), MediaError>,
    },
    AnswerCreated {
        attempt: u64,
        result: Result<SessionDescription, MediaError>,
    },
    AnswerApplied {
        attempt: u64,
        result: Result<(), MediaError>,
    },
    CandidateApplied {
        attempt: u64,
        result: Result<(), MediaError>,
    },
    LocalCandidate {
        attempt: u64,
        candidate: IceCandidate,
    },
    RemoteTrack {
        attempt: u64,
        track: RemoteTrack,
    },
    Timeout {
        attempt: u64,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running direct call coordinator.
#[derive(Clone)]
pub struct DirectCallCoordinator {
    worker: WorkerHandle<Command>,
    events: broadcast::Sender<CallEvent<DirectCallState>>,
    snapshots: watch::Receiver<DirectCallSnapshot>,
}

impl DirectCallCoordinator {
    /// Spawn the worker and start listening for call attempts on the private
    /// channel of `config.self_id`. Must be called from within a tokio runtime.
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
            Arc::new(DirectListener::new(handle.clone(), config.self_id.clone()));
        let fanout = EventFanout::new(
            config.event_capacity,
            config.log_limit,
            DirectCallSnapshot::default(),
        );

        let coordinator = Self {
            worker: handle.clone(),
            events: fanout.event_sender(),
            snapshots: fanout.snapshot_receiver(),
        };

        let worker = DirectCallWorker {
            config,
            media,
            relay,
            signaling: DirectSignaling::new(session),
            listener,
            handle: handle.clone(),
            fanout,
            call: None,
            next_attempt: 0,
        };
        tokio::spawn(worker.run(rx));
        handle.post(Command::Listen);

        coordinator
    }

    fn post(&self, command: Command) -> Result<(), CallError> {
        if self.worker.post(command) {
            Ok(())
        } else {
            Err(CallError::Disposed)
        }
    }

    /// Ring `peer`. Ignored unless idle.
    pub fn place_call(&self, peer: impl Into<UserId>, kind: CallKind) -> Result<(), CallError> {
        self.post(Command::PlaceCall {
            peer: peer.into(),
            kind,
        })
    }

    /// Handle a call attempt delivered out of band (e.g. a push notification).
    /// Attempts on the private channel are handled without this call.
    pub fn receive_call(
        &self,
        peer: impl Into<UserId>,
        kind: CallKind,
        channel: ChannelName,
    ) -> Result<(), CallError> {
        self.post(Command::ReceiveCall {
            peer: peer.into(),
            kind,
            channel,
        })
    }

    /// Accept the ringing incoming call.
    pub fn answer(&self) -> Result<(), CallError> {
        self.post(Command::Answer)
    }

    /// Reject the incoming call or end the current one.
    pub fn decline(&self) -> Result<(), CallError> {
        self.post(Command::Decline)
    }

    pub fn hang_up(&self) -> Result<(), CallError> {
        self.post(Command::Decline)
    }

    pub fn set_audio_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.post(Command::SetAudioEnabled(enabled))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent<DirectCallState>> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<DirectCallSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> DirectCallSnapshot {
        self.snapshots.borrow().clone()
    }

    /// End any call in progress, leave all channels and stop the worker.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.worker.post(Command::Shutdown(done_tx)) {
            let _ = done_rx.await;
        }
    }
}

/// Posts engine callbacks for one attempt back to the worker.
struct AttemptObserver {
    worker: WorkerHandle<Command>,
    attempt: u64,
}

impl ConnectionObserver for AttemptObserver {
    fn on_local_ice_candidate(&self, candidate: IceCandidate) {
        self.worker.post(Command::LocalCandidate {
            attempt: self.attempt,
            candidate,
        });
    }

    fn on_remote_track(&self, track: RemoteTrack) {
        self.worker.post(Command::RemoteTrack {
            attempt: self.attempt,
            track,
        });
    }
}

struct ActiveCall {
    info: CallSession,
    connection: Option<Arc<dyn PeerConnection>>,
    candidates: CandidateBuffer,
    timer: Option<JoinHandle<()>>,
}

struct DirectCallWorker {
    config: CallConfig,
    media: Arc<dyn MediaEngine>,
    relay: Arc<dyn RelaySource>,
    signaling: DirectSignaling,
    listener: Arc<dyn ChannelListener>,
    handle: WorkerHandle<Command>,
    fanout: EventFanout<DirectCallState, DirectCallSnapshot>,
    call: Option<ActiveCall>,
    next_attempt: u64,
}

impl DirectCallWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!("Direct call worker started for {}", self.config.self_id);
        let disposer = self.handle.clone();
        let _guard = scopeguard::guard((), move |_| disposer.dispose());

        while let Some(command) = rx.recv().await {
            if let Command::Shutdown(done) = command {
                self.shutdown().await;
                let _ = done.send(());
                break;
            }
            self.handle_command(command);
            self.publish_snapshot();
        }
        info!("Direct call worker stopped for {}", self.config.self_id);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Listen => self.listen(),
            Command::PlaceCall { peer, kind } => self.place_call(peer, kind),
            Command::ReceiveCall {
                peer,
                kind,
                channel,
            } => self.receive_call(peer, kind, channel),
            Command::Answer => self.answer(),
            Command::Decline => self.decline("Call ended"),
            Command::SetAudioEnabled(enabled) => self.set_audio_enabled(enabled),
            Command::Signal { channel, message } => self.on_signal(channel, message),
            Command::MemberAdded { channel, member } => self.on_member_added(channel, member),
            Command::MemberRemoved { channel, member } => {
                self.on_member_removed(channel, member)
            }
            Command::TransportError { channel, message } => {
                self.on_transport_error(channel, message)
            }
            Command::Listening(result) => match result {
                Ok(()) => self.fanout.log(LogKind::Internal, "Listening for calls"),
                Err(e) => {
                    error!("Failed to subscribe to private channel: {e}");
                    self.fanout
                        .log(LogKind::Error, format!("Failed to listen for calls: {e}"));
                }
            },
            Command::Prepared { attempt, result } => self.on_prepared(attempt, result),
            Command::PresenceJoined { attempt, result } => {
                if let Err(e) = result
                    && self.current(attempt).is_some()
                {
                    self.fail("Failed to answer call", &e);
                }
            }
            Command::OfferCreated { attempt, result } => self.on_offer_created(attempt, result),
            Command::OfferApplied { attempt, result } => self.on_offer_applied(attempt, result),
            Command::AnswerCreated { attempt, result } => {
                self.on_answer_created(attempt, result)
            }
            Command::AnswerApplied { attempt, result } => {
                self.on_answer_applied(attempt, result)
            }
            Command::CandidateApplied { attempt, result } => {
                if let Err(e) = result
                    && self.current(attempt).is_some()
                {
                    warn!("Failed to apply remote candidate: {e}");
                    self.fanout.log(LogKind::Error, e.to_string());
                }
            }
            Command::LocalCandidate { attempt, candidate } => {
                self.on_local_candidate(attempt, candidate)
            }
            Command::RemoteTrack { attempt, track } => {
                if let Some(active) = self.current(attempt) {
                    let peer = active.info.peer.clone();
                    self.fanout
                        .log(LogKind::Internal, format!("Remote {:?} track", track.kind));
                    self.fanout.emit(CallEvent::RemoteTrack { peer, track });
                }
            }
            Command::Timeout { attempt } => {
                let timed_out = self
                    .current(attempt)
                    .is_some_and(|active| !active.info.state.is_running());
                if timed_out {
                    info!("Call attempt {attempt} timed out");
                    self.fanout.log(LogKind::Internal, "No answer");
                    self.decline("Call ended");
                }
            }
            Command::Shutdown(_) => {}
        }
    }

    /// The active call, if it belongs to `attempt`.
    fn current(&self, attempt: u64) -> Option<&ActiveCall> {
        self.call
            .as_ref()
            .filter(|active| active.info.attempt == attempt)
    }

    fn state(&self) -> DirectCallState {
        self.call
            .as_ref()
            .map_or(DirectCallState::None, |active| active.info.state)
    }

    fn transition(&mut self, transition: DirectTransition) -> bool {
        let Some(active) = self.call.as_mut() else {
            return false;
        };
        match active.info.apply_transition(transition) {
            Ok(state) => {
                debug!("Call with {} is now {state:?}", active.info.peer);
                self.fanout.emit(CallEvent::StateChanged(state));
                true
            }
            Err(e) => {
                debug!("Ignoring {transition:?}: {e}");
                false
            }
        }
    }

    fn listen(&self) {
        let session = self.signaling.session().clone();
        let listener = self.listener.clone();
        let own = ChannelName::private_for(&self.config.self_id);
        self.handle.spawn_completion(
            async move {
                session
                    .subscribe(&own, SubscriptionKind::Private, listener)
                    .await
                    .map_err(CallError::from)
            },
            Command::Listening,
        );
    }

    fn place_call(&mut self, peer: UserId, kind: CallKind) {
        if let Some(active) = &self.call {
            debug!(
                "Ignoring call to {peer}: already {:?} with {}",
                active.info.state, active.info.peer
            );
            return;
        }
        if peer == self.config.self_id {
            warn!("Refusing to call self");
            return;
        }

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let info = CallSession::new_outgoing(self.config.self_id.clone(), peer, kind, attempt);
        let presence = info.channel.clone();
        info!("Calling {} ({kind}) on {presence}", info.peer);
        self.fanout
            .log(LogKind::Internal, format!("Calling {}", info.peer));

        self.begin(info, DirectTransition::Place, Some(presence));
    }

    fn receive_call(&mut self, peer: UserId, kind: CallKind, channel: ChannelName) {
        if let Some(active) = &self.call {
            if active.info.peer == peer && active.info.channel == channel {
                debug!("Duplicate call attempt from {peer}");
                return;
            }
            info!("Busy: rejecting call from {peer}");
            self.fanout
                .log(LogKind::Outbound, format!("Busy sent to {peer}"));
            sent(self.signaling.busy(&peer, &channel));
            return;
        }

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        info!("Incoming {kind} call from {peer} on {channel}");
        self.fanout
            .log(LogKind::Inbound, format!("Incoming call from {peer}"));
        let info = CallSession::new_incoming(
            self.config.self_id.clone(),
            peer,
            kind,
            channel,
            attempt,
        );

        self.begin(info, DirectTransition::Receive, None);
    }

    /// Install a new call, arm its timer and prepare the connection.
    fn begin(
        &mut self,
        info: CallSession,
        transition: DirectTransition,
        presence: Option<ChannelName>,
    ) {
        let attempt = info.attempt;
        let kind = info.kind;
        self.call = Some(ActiveCall {
            info,
            connection: None,
            candidates: CandidateBuffer::default(),
            timer: Some(self.arm_timeout(attempt)),
        });
        self.transition(transition);

        let relay = self.relay.clone();
        let media = self.media.clone();
        let session = self.signaling.session().clone();
        let listener = self.listener.clone();
        let own = ChannelName::private_for(&self.config.self_id);
        let observer: Arc<dyn ConnectionObserver> = Arc::new(AttemptObserver {
            worker: self.handle.clone(),
            attempt,
        });

        self.handle.spawn_completion(
            async move {
                let ice_servers = relay.fetch().await?;
                let config = ConnectionConfig {
                    ice_servers,
                    kind,
                    send_audio: true,
                };
                let connection = media.create_connection(config, observer).await?;

                if let Err(e) = subscribe_call_channels(&session, &own, presence, listener).await {
                    connection.close().await;
                    return Err(CallError::from(e));
                }
                Ok::<_, CallError>(connection)
            },
            move |result| Command::Prepared { attempt, result },
        );
    }

    fn arm_timeout(&self, attempt: u64) -> JoinHandle<()> {
        let worker = self.handle.clone();
        let timeout = self.config.ring_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            worker.post(Command::Timeout { attempt });
        })
    }

    fn on_prepared(&mut self, attempt: u64, result: Result<Arc<dyn PeerConnection>, CallError>) {
        let Some(active) = self
            .call
            .as_mut()
            .filter(|active| active.info.attempt == attempt)
        else {
            if let Ok(connection) = result {
                debug!("Closing connection prepared for stale attempt {attempt}");
                tokio::spawn(async move { connection.close().await });
            }
            return;
        };

        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                let message = match (&e, active.info.is_initiator()) {
                    (CallError::Relay(_), _) => "Failed to receive ice servers",
                    (_, true) => "Failed to init call",
                    (_, false) => "Failed to receive call",
                };
                self.fail(message, &e);
                return;
            }
        };

        connection.set_audio_enabled(active.info.audio_enabled);
        active.connection = Some(connection);
        if !self.transition(DirectTransition::Prepared) {
            return;
        }

        let Some(active) = self.call.as_ref() else {
            return;
        };
        if active.info.is_initiator() {
            let peer = active.info.peer.clone();
            self.fanout
                .log(LogKind::Outbound, format!("Call attempt sent to {peer}"));
            sent(self.signaling.call_attempt(&active.info));
        } else {
            self.fanout.log(LogKind::Internal, "Ringing");
        }
    }

    fn answer(&mut self) {
        let state = self.state();
        if state != DirectCallState::CallingIn {
            debug!("Ignoring answer in {state:?}");
            return;
        }
        let Some(active) = self.call.as_ref() else {
            return;
        };
        let attempt = active.info.attempt;
        let presence = active.info.channel.clone();
        self.transition(DirectTransition::LocalAnswered);
        self.fanout.log(LogKind::Internal, "Awaiting offer");

        let session = self.signaling.session().clone();
        let listener = self.listener.clone();
        self.handle.spawn_completion(
            async move {
                session
                    .subscribe(&presence, SubscriptionKind::Presence, listener)
                    .await
                    .map_err(CallError::from)
            },
            move |result| Command::PresenceJoined { attempt, result },
        );
    }

    fn decline(&mut self, message: &str) {
        let Some(active) = self.call.as_ref() else {
            debug!("Ignoring decline without a call");
            return;
        };
        self.fanout.log(
            LogKind::Outbound,
            format!("Decline sent to {}", active.info.peer),
        );
        sent(self.signaling.decline(&active.info));
        self.teardown(message);
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        let Some(active) = self.call.as_mut() else {
            return;
        };
        active.info.audio_enabled = enabled;
        if let Some(connection) = &active.connection {
            connection.set_audio_enabled(enabled);
        }
        let state = if enabled { "enabled" } else { "disabled" };
        self.fanout
            .log(LogKind::Internal, format!("Local audio {state}"));
    }

    fn on_member_added(&mut self, channel: ChannelName, member: UserId) {
        let Some(active) = self.call.as_mut() else {
            return;
        };
        if active.info.channel != channel || active.info.peer != member {
            return;
        }
        if active.info.state != DirectCallState::CallingOut {
            debug!("{member} joined {channel} in {:?}", active.info.state);
            return;
        }
        let Some(connection) = active.connection.clone() else {
            return;
        };

        active.info.session_id = Some(SessionId::generate());
        let attempt = active.info.attempt;
        self.transition(DirectTransition::PeerJoined);
        self.fanout.log(LogKind::Internal, "Creating offer");
        self.handle.spawn_completion(sdp::local_offer(connection), move |result| {
            Command::OfferCreated { attempt, result }
        });
    }

    fn on_offer_created(&mut self, attempt: u64, result: Result<SessionDescription, MediaError>) {
        let Some(active) = self.current(attempt) else {
            return;
        };
        if active.info.state != DirectCallState::CreatingOffer {
            return;
        }
        match result {
            Ok(offer) => {
                sent(self.signaling.offer(&active.info, offer));
                self.fanout.log(LogKind::Outbound, "Offer sent");
                self.transition(DirectTransition::OfferSent);
                self.flush_candidates();
            }
            Err(e) => self.fail("Failed sending offer", &e),
        }
    }

    fn on_signal(&mut self, channel: ChannelName, message: SignalingMessage) {
        let signal = message.signal_type();
        if signal.is_floor_notice() {
            debug!("Ignoring {signal} on {channel}");
            return;
        }
        self.fanout.log(
            LogKind::Inbound,
            format!("{signal} received from {}", message.from),
        );
        let addressed_to_me = message.is_addressed_to(&self.config.self_id);

        match message.body {
            SignalBody::Call {
                channel: call_channel,
                kind,
            } => {
                if addressed_to_me {
                    self.receive_call(message.from, kind, call_channel);
                }
            }
            SignalBody::Offer { description, .. } => {
                self.on_offer(channel, message.from, message.to, message.session_id, description)
            }
            SignalBody::Answer { description } => {
                self.on_answer(message.from, message.to, message.session_id, description)
            }
            SignalBody::IceCandidate { candidate } => {
                self.on_remote_candidate(message.from, message.to, message.session_id, candidate)
            }
            SignalBody::Decline {
                channel: call_channel,
            } => self.on_decline(message.from, call_channel, false),
            SignalBody::Busy {
                channel: call_channel,
            } => self.on_decline(message.from, call_channel, true),
            SignalBody::StartTalk | SignalBody::StopTalk => {}
        }
    }

    /// Sender and recipient match the current call.
    fn is_from_peer(&self, from: &UserId, to: Option<&UserId>) -> bool {
        self.call.as_ref().is_some_and(|active| {
            active.info.peer == *from && to == Some(&self.config.self_id)
        })
    }

    fn on_offer(
        &mut self,
        channel: ChannelName,
        from: UserId,
        to: Option<UserId>,
        session_id: Option<SessionId>,
        description: SessionDescription,
    ) {
        if !self.is_from_peer(&from, to.as_ref()) {
            debug!("Ignoring offer from {from}");
            return;
        }
        let Some(active) = self.call.as_mut() else {
            return;
        };
        if active.info.state != DirectCallState::AwaitingOffer || active.info.channel != channel {
            debug!("Ignoring offer in {:?}", active.info.state);
            return;
        }
        let Some(connection) = active.connection.clone() else {
            return;
        };

        active.info.session_id = session_id;
        let attempt = active.info.attempt;
        self.transition(DirectTransition::OfferReceived);
        self.handle.spawn_completion(
            async move { connection.set_remote_description(description).await },
            move |result| Command::OfferApplied { attempt, result },
        );
    }

    fn on_offer_applied(&mut self, attempt: u64, result: Result<(), MediaError>) {
        let Some(active) = self.current(attempt) else {
            return;
        };
        if active.info.state != DirectCallState::SettingOffer {
            return;
        }
        let Some(connection) = active.connection.clone() else {
            return;
        };
        match result {
            Ok(()) => {
                self.transition(DirectTransition::OfferApplied);
                self.handle
                    .spawn_completion(sdp::local_answer(connection), move |result| {
                        Command::AnswerCreated { attempt, result }
                    });
            }
            Err(e) => self.fail("Failed setting offer", &e),
        }
    }

    fn on_answer_created(&mut self, attempt: u64, result: Result<SessionDescription, MediaError>) {
        let Some(active) = self.current(attempt) else {
            return;
        };
        if active.info.state != DirectCallState::CreatingAnswer {
            return;
        }
        match result {
            Ok(answer) => {
                sent(self.signaling.answer(&active.info, answer));
                self.fanout.log(LogKind::Outbound, "Answer sent");
                self.transition(DirectTransition::AnswerSent);
                self.flush_candidates();
                self.on_running();
            }
            Err(e) => self.fail("Failed creating answer", &e),
        }
    }

    fn on_answer(
        &mut self,
        from: UserId,
        to: Option<UserId>,
        session_id: Option<SessionId>,
        description: SessionDescription,
    ) {
        if !self.is_from_peer(&from, to.as_ref()) {
            debug!("Ignoring answer from {from}");
            return;
        }
        let Some(active) = self.call.as_mut() else {
            return;
        };
        if active.info.state != DirectCallState::AwaitingAnswer {
            debug!("Ignoring answer in {:?}", active.info.state);
            return;
        }
        if session_id.is_none() || active.info.session_id != session_id {
            debug!("Ignoring answer for another session");
            return;
        }
        let Some(connection) = active.connection.clone() else {
            return;
        };

        let attempt = active.info.attempt;
        self.transition(DirectTransition::AnswerReceived);
        self.handle.spawn_completion(
            async move { connection.set_remote_description(description).await },
            move |result| Command::AnswerApplied { attempt, result },
        );
    }

    fn on_answer_applied(&mut self, attempt: u64, result: Result<(), MediaError>) {
        let Some(active) = self.current(attempt) else {
            return;
        };
        if active.info.state != DirectCallState::SettingAnswer {
            return;
        }
        match result {
            Ok(()) => {
                self.transition(DirectTransition::AnswerApplied);
                self.on_running();
            }
            Err(e) => self.fail("Failed setting answer", &e),
        }
    }

    fn on_running(&mut self) {
        if let Some(active) = self.call.as_mut() {
            if let Some(timer) = active.timer.take() {
                timer.abort();
            }
            info!("Call with {} is running", active.info.peer);
        }
        self.fanout.log(LogKind::Internal, "Call running");
    }

    fn on_remote_candidate(
        &mut self,
        from: UserId,
        to: Option<UserId>,
        session_id: Option<SessionId>,
        candidate: IceCandidate,
    ) {
        if !self.is_from_peer(&from, to.as_ref()) {
            return;
        }
        let Some(active) = self.call.as_ref() else {
            return;
        };
        if let (Some(ours), Some(theirs)) = (&active.info.session_id, &session_id)
            && ours != theirs
        {
            debug!("Ignoring candidate for session {theirs}");
            return;
        }
        let Some(connection) = active.connection.clone() else {
            debug!("Ignoring candidate before the connection exists");
            return;
        };

        let attempt = active.info.attempt;
        self.handle.spawn_completion(
            async move { connection.add_ice_candidate(candidate).await },
            move |result| Command::CandidateApplied { attempt, result },
        );
    }

    fn on_local_candidate(&mut self, attempt: u64, candidate: IceCandidate) {
        let Some(active) = self
            .call
            .as_mut()
            .filter(|active| active.info.attempt == attempt)
        else {
            return;
        };
        if let Some(candidate) = active.candidates.push(candidate) {
            sent(self.signaling.ice_candidate(&active.info, candidate));
        }
    }

    fn flush_candidates(&mut self) {
        let Some(active) = self.call.as_mut() else {
            return;
        };
        for candidate in active.candidates.open() {
            sent(self.signaling.ice_candidate(&active.info, candidate));
        }
    }

    fn on_decline(&mut self, from: UserId, channel: Option<ChannelName>, busy: bool) {
        let Some(active) = self.call.as_ref() else {
            return;
        };
        if active.info.peer != from {
            debug!("Ignoring decline from {from}");
            return;
        }
        if let Some(channel) = channel
            && channel != active.info.channel
        {
            debug!("Ignoring decline for {channel}");
            return;
        }
        let message = if busy {
            format!("{from} is busy")
        } else {
            "Call ended".to_string()
        };
        self.teardown(&message);
    }

    fn on_member_removed(&mut self, channel: ChannelName, member: UserId) {
        let Some(active) = self.call.as_ref() else {
            return;
        };
        if active.info.channel != channel || active.info.peer != member {
            return;
        }
        let state = active.info.state;
        if state.is_negotiating() || state.is_running() {
            self.teardown(&format!("{member} left the call"));
        }
    }

    fn on_transport_error(&mut self, channel: ChannelName, message: String) {
        error!("Signaling failure on {channel}: {message}");
        let affects_call = self.call.as_ref().is_some_and(|active| {
            channel == active.info.channel
                || channel == ChannelName::private_for(&active.info.peer)
                || channel == ChannelName::private_for(&self.config.self_id)
        });
        if affects_call {
            self.fanout.log(LogKind::Error, message.clone());
            self.send_decline_quietly();
            self.teardown(&message);
        } else {
            self.fanout.log(LogKind::Error, message);
        }
    }

    /// Abort the call after a local failure and tell the peer.
    fn fail(&mut self, message: &str, error: &dyn std::fmt::Display) {
        warn!("{message}: {error}");
        self.fanout
            .log(LogKind::Error, format!("{message}: {error}"));
        self.send_decline_quietly();
        self.teardown(message);
    }

    fn send_decline_quietly(&self) {
        if let Some(active) = self.call.as_ref() {
            sent(self.signaling.decline(&active.info));
        }
    }

    /// Release everything owned by the current call. Does not notify the peer.
    fn teardown(&mut self, message: &str) {
        let Some(mut active) = self.call.take() else {
            return;
        };
        if let Some(timer) = active.timer.take() {
            timer.abort();
        }
        if let Some(connection) = active.connection.take() {
            tokio::spawn(async move { connection.close().await });
        }
        self.signaling.session().unsubscribe(&active.info.channel);

        let _ = active.info.apply_transition(DirectTransition::Ended);
        info!("Call with {} finished: {message}", active.info.peer);
        self.fanout.log(LogKind::Internal, message);
        self.fanout
            .emit(CallEvent::StateChanged(DirectCallState::None));
        self.fanout.emit(CallEvent::Finished {
            message: message.to_string(),
        });
    }

    async fn shutdown(&mut self) {
        if self.call.is_some() {
            self.decline("Call ended");
        }
        self.signaling.session().close().await;
        self.handle.dispose();
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        self.fanout.publish(DirectCallSnapshot {
            state: self.state(),
            call: self.call.as_ref().map(|active| active.info.clone()),
            log: self.fanout.log_entries(),
        });
    }
}

async fn subscribe_call_channels(
    session: &ChannelSession,
    own: &ChannelName,
    presence: Option<ChannelName>,
    listener: Arc<dyn ChannelListener>,
) -> Result<(), ChannelError> {
    session
        .subscribe(own, SubscriptionKind::Private, listener.clone())
        .await?;
    if let Some(presence) = presence {
        session
            .subscribe(&presence, SubscriptionKind::Presence, listener)
            .await?;
    }
    Ok(())
}

fn sent(result: Result<(), CodecError>) {
    if let Err(e) = result {
        warn!("Failed to encode signal: {e}");
    }
}
