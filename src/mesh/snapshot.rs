#![forbid(unsafe_code)]

// Mesh snapshot - what the presentation layer sees

use super::entry::NegotiationRole;
use crate::media::{MediaKind, RemoteMedia};
use crate::rtc::PeerState;
use crate::signaling::Participant;
use uuid::Uuid;

/// Identifies one live call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Random id for log correlation
    pub session_id: Uuid,
    pub room_key: String,
    pub kind: MediaKind,
    pub local_participant_id: String,
}

impl SessionInfo {
    pub fn new(room_key: impl Into<String>, kind: MediaKind, local_participant_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            room_key: room_key.into(),
            kind,
            local_participant_id: local_participant_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub participant_id: String,
    pub role: NegotiationRole,
    pub state: PeerState,
}

/// Point-in-time view of a session. `session` is None when idle.
#[derive(Debug, Clone, Default)]
pub struct MeshSnapshot {
    pub session: Option<SessionInfo>,
    pub roster: Vec<Participant>,
    /// Sorted by participant id
    pub peers: Vec<PeerSummary>,
    /// Sorted by participant id
    pub remote_media: Vec<RemoteMedia>,
    pub audio_enabled: Option<bool>,
    pub video_enabled: Option<bool>,
}

impl MeshSnapshot {
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn peer(&self, participant_id: &str) -> Option<&PeerSummary> {
        self.peers.iter().find(|p| p.participant_id == participant_id)
    }

    pub fn connected_peers(&self) -> usize {
        self.peers.iter().filter(|p| p.state == PeerState::Connected).count()
    }
}
