//! Scripted media engine.
//!
//! Produces synthetic SDP, reports one host candidate per local description
//! and one remote track per media section once a remote description is set.
//! Operations can be made to fail on demand.

use async_trait::async_trait;
use rand::RngCore;
use rtccore::media::{
    ConnectionConfig, ConnectionObserver, IceCandidate, MediaEngine, MediaError, PeerConnection,
    RemoteTrack, SdpType, SessionDescription, TrackKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaOperation {
    CreateConnection,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
}

type FailurePlan = Arc<Mutex<HashMap<MediaOperation, usize>>>;

fn take_failure(plan: &FailurePlan, op: MediaOperation) -> bool {
    let mut plan = plan.lock().expect("Mutex should not be poisoned");
    match plan.get_mut(&op) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

pub struct ScriptedMediaEngine {
    label: String,
    next_id: AtomicU64,
    connections: Mutex<Vec<Arc<ScriptedConnection>>>,
    failures: FailurePlan,
}

impl ScriptedMediaEngine {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            next_id: AtomicU64::new(1),
            connections: Mutex::new(Vec::new()),
            failures: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Make the next call of `op` fail, on any connection of this engine.
    pub fn fail_next(&self, op: MediaOperation) {
        *self
            .failures
            .lock()
            .expect("Mutex should not be poisoned")
            .entry(op)
            .or_default() += 1;
    }

    /// Every connection created so far, oldest first.
    pub fn connections(&self) -> Vec<Arc<ScriptedConnection>> {
        self.connections
            .lock()
            .expect("Mutex should not be poisoned")
            .clone()
    }

    pub fn open_connections(&self) -> usize {
        self.connections()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }
}

#[async_trait]
impl MediaEngine for ScriptedMediaEngine {
    async fn create_connection(
        &self,
        config: ConnectionConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Arc<dyn PeerConnection>, MediaError> {
        if take_failure(&self.failures, MediaOperation::CreateConnection) {
            return Err(MediaError::CreateConnection("injected failure".into()));
        }
        let connection = Arc::new(ScriptedConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            label: self.label.clone(),
            config,
            observer,
            failures: self.failures.clone(),
            state: Mutex::new(ConnectionState {
                audio_enabled: true,
                ..Default::default()
            }),
        });
        self.connections
            .lock()
            .expect("Mutex should not be poisoned")
            .push(connection.clone());
        Ok(connection)
    }
}

#[derive(Default)]
struct ConnectionState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    pending_remote: Vec<IceCandidate>,
    applied: Vec<IceCandidate>,
    audio_enabled: bool,
    close_calls: usize,
}

pub struct ScriptedConnection {
    id: u64,
    label: String,
    config: ConnectionConfig,
    observer: Arc<dyn ConnectionObserver>,
    failures: FailurePlan,
    state: Mutex<ConnectionState>,
}

impl ScriptedConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().expect("Mutex should not be poisoned")
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state().remote.clone()
    }

    /// Remote candidates applied after the remote description was set.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state().applied.clone()
    }

    pub fn audio_enabled(&self) -> bool {
        self.state().audio_enabled
    }

    pub fn is_closed(&self) -> bool {
        self.state().close_calls > 0
    }

    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }

    fn check(&self, op: MediaOperation, error: fn(String) -> MediaError) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Closed);
        }
        if take_failure(&self.failures, op) {
            return Err(error("injected failure".into()));
        }
        Ok(())
    }

    fn synthetic_sdp(&self) -> String {
        let mut ufrag = [0u8; 4];
        rand::rng().fill_bytes(&mut ufrag);
        let direction = if self.config.send_audio {
            "sendrecv"
        } else {
            "recvonly"
        };

        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns={}\r\nt=0 0\r\na=ice-ufrag:{}\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\na={}\r\n",
            self.id,
            self.label,
            hex::encode(ufrag),
            direction
        );
        if self.config.kind.has_video() {
            sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:1\r\na=sendrecv\r\n");
        }
        sdp
    }
}

#[async_trait]
impl PeerConnection for ScriptedConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.check(MediaOperation::CreateOffer, MediaError::CreateOffer)?;
        Ok(SessionDescription::offer(self.synthetic_sdp()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        self.check(MediaOperation::CreateAnswer, MediaError::CreateAnswer)?;
        let has_offer = self
            .state()
            .remote
            .as_ref()
            .is_some_and(|d| d.sdp_type == SdpType::Offer);
        if !has_offer {
            return Err(MediaError::CreateAnswer("no remote offer".into()));
        }
        Ok(SessionDescription::answer(self.synthetic_sdp()))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.check(
            MediaOperation::SetLocalDescription,
            MediaError::SetLocalDescription,
        )?;
        self.state().local = Some(description);

        let candidate = IceCandidate::new(format!(
            "candidate:{} 1 UDP 2130706431 127.0.0.1 {} typ host",
            self.id,
            40000 + self.id
        ))
        .with_sdp_mid("0")
        .with_sdp_m_line_index(0);
        self.observer.on_local_ice_candidate(candidate);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.check(
            MediaOperation::SetRemoteDescription,
            MediaError::SetRemoteDescription,
        )?;
        let has_video = description.sdp.contains("m=video");
        {
            let mut state = self.state();
            if state.remote.is_some() {
                return Err(MediaError::SetRemoteDescription(
                    "remote description already set".to_string(),
                ));
            }
            state.remote = Some(description);
            let pending = std::mem::take(&mut state.pending_remote);
            state.applied.extend(pending);
        }

        self.observer.on_remote_track(RemoteTrack {
            id: format!("{}-audio-{}", self.label, self.id),
            kind: TrackKind::Audio,
        });
        if has_video {
            self.observer.on_remote_track(RemoteTrack {
                id: format!("{}-video-{}", self.label, self.id),
                kind: TrackKind::Video,
            });
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.check(MediaOperation::AddIceCandidate, MediaError::AddIceCandidate)?;
        let mut state = self.state();
        if state.remote.is_some() {
            state.applied.push(candidate);
        } else {
            state.pending_remote.push(candidate);
        }
        Ok(())
    }

    fn set_audio_enabled(&self, enabled: bool) {
        self.state().audio_enabled = enabled;
    }

    async fn close(&self) {
        self.state().close_calls += 1;
    }
}
