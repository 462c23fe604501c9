//! Media engine capability.
//!
//! The coordinators never touch codecs or sockets. They drive a
//! [`MediaEngine`] that hands out [`PeerConnection`]s and reports
//! asynchronous discoveries (local ICE candidates, remote tracks) through a
//! [`ConnectionObserver`].

use crate::types::CallKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("failed to create connection: {0}")]
    CreateConnection(String),

    #[error("failed to create offer: {0}")]
    CreateOffer(String),

    #[error("failed to create answer: {0}")]
    CreateAnswer(String),

    #[error("failed to set local description: {0}")]
    SetLocalDescription(String),

    #[error("failed to set remote description: {0}")]
    SetRemoteDescription(String),

    #[error("failed to add ice candidate: {0}")]
    AddIceCandidate(String),

    #[error("connection closed")]
    Closed,
}

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
}

impl SdpType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An SDP offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate, local or remote.
///
/// Serialized with the field names browsers use (`sdpMid`, `sdpMLineIndex`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate line (e.g., "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host")
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_m_line_index(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }
}

/// A STUN/TURN server descriptor handed to new connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }

    /// TURN servers need both halves of the credential pair.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.credential.is_some()
    }
}

/// Settings for a new peer connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub ice_servers: Vec<IceServer>,
    /// Media kind negotiated over this connection.
    pub kind: CallKind,
    /// Whether local audio is attached. Push-to-talk listeners only receive.
    pub send_audio: bool,
}

/// Kind of a remote track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A remote media track surfaced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Receives asynchronous discoveries of one connection.
///
/// Implementations must not block: they are invoked from engine threads and
/// are expected to hand the value off (the coordinators post it to their
/// worker queue).
pub trait ConnectionObserver: Send + Sync {
    fn on_local_ice_candidate(&self, candidate: IceCandidate);

    fn on_remote_track(&self, track: RemoteTrack);
}

/// A single peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    /// Remote candidates may arrive before the remote description; engines
    /// buffer them internally.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    fn set_audio_enabled(&self, enabled: bool);

    /// Release the connection. Closing an already closed connection is a no-op.
    async fn close(&self);
}

/// Factory for peer connections.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_connection(
        &self,
        config: ConnectionConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Arc<dyn PeerConnection>, MediaError>;
}
