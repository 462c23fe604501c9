//! Session-scoped peer negotiations of a push-to-talk mesh.
//!
//! Each remote member has at most one negotiation at a time. Every message of
//! a negotiation carries the session id it was started with; anything tagged
//! with another id belongs to a superseded turn and is dropped.

use crate::calls::candidates::CandidateBuffer;
use log::debug;
use rtccore::media::{IceCandidate, PeerConnection};
use rtccore::types::{SessionId, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NegotiationRole {
    /// Local speaker offering media to a listener.
    Offerer,
    /// Local listener answering the speaker.
    Answerer,
}

/// Snapshot view of one negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegotiationInfo {
    pub peer: UserId,
    pub session_id: SessionId,
    pub role: NegotiationRole,
    pub connected: bool,
    pub answered: bool,
}

pub(crate) struct NegotiationSession {
    peer: UserId,
    session_id: SessionId,
    role: NegotiationRole,
    connection: Option<Arc<dyn PeerConnection>>,
    candidates: CandidateBuffer,
    /// Remote candidates held until the description exchange completes.
    pending_remote: Vec<IceCandidate>,
    /// A remote answer is being applied.
    applying_answer: bool,
    answered: bool,
}

impl NegotiationSession {
    pub(crate) fn offerer(peer: UserId, session_id: SessionId) -> Self {
        Self::new(peer, session_id, NegotiationRole::Offerer)
    }

    pub(crate) fn answerer(peer: UserId, session_id: SessionId) -> Self {
        Self::new(peer, session_id, NegotiationRole::Answerer)
    }

    fn new(peer: UserId, session_id: SessionId, role: NegotiationRole) -> Self {
        Self {
            peer,
            session_id,
            role,
            connection: None,
            candidates: CandidateBuffer::default(),
            pending_remote: Vec::new(),
            applying_answer: false,
            answered: false,
        }
    }

    pub(crate) fn role(&self) -> NegotiationRole {
        self.role
    }

    pub(crate) fn matches(&self, session_id: &SessionId) -> bool {
        self.session_id == *session_id
    }

    pub(crate) fn attach(&mut self, connection: Arc<dyn PeerConnection>) {
        self.connection = Some(connection);
    }

    pub(crate) fn connection(&self) -> Option<Arc<dyn PeerConnection>> {
        self.connection.clone()
    }

    /// Returns the candidate back if the local description is already out.
    pub(crate) fn push_local(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        self.candidates.push(candidate)
    }

    pub(crate) fn open_local(&mut self) -> Vec<IceCandidate> {
        self.candidates.open()
    }

    pub(crate) fn buffer_remote(&mut self, candidate: IceCandidate) {
        self.pending_remote.push(candidate);
    }

    /// Remote candidates can be applied once both descriptions are in place.
    pub(crate) fn remote_ready(&self) -> bool {
        self.connection.is_some() && self.answered
    }

    /// Take the held remote candidates, if they can be applied now.
    pub(crate) fn take_remote(&mut self) -> Option<(Arc<dyn PeerConnection>, Vec<IceCandidate>)> {
        if !self.remote_ready() || self.pending_remote.is_empty() {
            return None;
        }
        let connection = self.connection.clone()?;
        Some((connection, std::mem::take(&mut self.pending_remote)))
    }

    /// Claim the remote answer slot. False if an answer was already taken.
    pub(crate) fn begin_answer(&mut self) -> bool {
        if self.answered || self.applying_answer {
            return false;
        }
        self.applying_answer = true;
        true
    }

    pub(crate) fn mark_answered(&mut self) {
        self.applying_answer = false;
        self.answered = true;
    }

    /// Release the connection in the background.
    pub(crate) fn close(self) {
        debug!(
            "Closing {:?} negotiation {} with {}",
            self.role, self.session_id, self.peer
        );
        if let Some(connection) = self.connection {
            tokio::spawn(async move { connection.close().await });
        }
    }

    pub(crate) fn info(&self) -> NegotiationInfo {
        NegotiationInfo {
            peer: self.peer.clone(),
            session_id: self.session_id.clone(),
            role: self.role,
            connected: self.connection.is_some(),
            answered: self.answered,
        }
    }
}

/// At most one negotiation per remote member.
#[derive(Default)]
pub(crate) struct NegotiationTable {
    sessions: HashMap<UserId, NegotiationSession>,
}

impl NegotiationTable {
    /// Returns the negotiation this one replaces, if any.
    pub(crate) fn insert(&mut self, session: NegotiationSession) -> Option<NegotiationSession> {
        self.sessions.insert(session.peer.clone(), session)
    }

    /// The negotiation with `peer`, only if it was started as `session_id`.
    pub(crate) fn get_mut(
        &mut self,
        peer: &UserId,
        session_id: &SessionId,
    ) -> Option<&mut NegotiationSession> {
        self.sessions
            .get_mut(peer)
            .filter(|session| session.matches(session_id))
    }

    pub(crate) fn remove(&mut self, peer: &UserId) -> Option<NegotiationSession> {
        self.sessions.remove(peer)
    }

    /// Remove the negotiation with `peer` only if it is `session_id`.
    pub(crate) fn remove_matching(
        &mut self,
        peer: &UserId,
        session_id: &SessionId,
    ) -> Option<NegotiationSession> {
        if self.get_mut(peer, session_id).is_some() {
            self.sessions.remove(peer)
        } else {
            None
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<NegotiationSession> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    /// Remove every negotiation with the given role.
    pub(crate) fn drain_role(&mut self, role: NegotiationRole) -> Vec<NegotiationSession> {
        let peers: Vec<UserId> = self
            .sessions
            .values()
            .filter(|session| session.role == role)
            .map(|session| session.peer.clone())
            .collect();
        peers
            .iter()
            .filter_map(|peer| self.sessions.remove(peer))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn infos(&self) -> Vec<NegotiationInfo> {
        let mut infos: Vec<_> = self.sessions.values().map(NegotiationSession::info).collect();
        infos.sort_by(|a, b| a.peer.cmp(&b.peer));
        infos
    }
}
