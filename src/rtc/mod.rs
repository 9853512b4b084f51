#![forbid(unsafe_code)]

// RTC module - peer connection seam between the mesh and the WebRTC stack

pub mod peer;

pub use peer::WebRtcPeerFactory;

use crate::error::CallResult;
use crate::media::{LocalTrack, RemoteTrack};
use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Liveness of one peer connection, mirroring the platform enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    New,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// States after which the entry is disposed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Disconnected | PeerState::Failed | PeerState::Closed)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::New => "new",
            PeerState::Negotiating => "negotiating",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Callback payload from a peer connection
#[derive(Debug, Clone)]
pub enum PeerEventKind {
    /// A local ICE candidate to trickle to the remote side
    LocalCandidate(IceCandidate),
    /// An inbound track arrived
    RemoteTrack(RemoteTrack),
    /// Connection state changed
    StateChanged(PeerState),
}

/// Event posted by a peer connection callback into the session's queue
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub participant_id: String,
    /// Distinguishes a replaced connection's late callbacks from the live one
    pub connection_id: u64,
    pub kind: PeerEventKind,
}

/// Sender handed to each transport. Callbacks only post events; all state
/// changes happen on the session task that drains the queue.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    tx: mpsc::UnboundedSender<PeerEvent>,
    participant_id: String,
    connection_id: u64,
}

impl PeerEvents {
    pub fn new(tx: mpsc::UnboundedSender<PeerEvent>, participant_id: impl Into<String>, connection_id: u64) -> Self {
        Self {
            tx,
            participant_id: participant_id.into(),
            connection_id,
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn emit(&self, kind: PeerEventKind) {
        let event = PeerEvent {
            participant_id: self.participant_id.clone(),
            connection_id: self.connection_id,
            kind,
        };
        if self.tx.send(event).is_err() {
            debug!("Session gone, dropping peer event for {}", self.participant_id);
        }
    }
}

/// Creates peer connections with the local tracks attached.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, local_tracks: &[LocalTrack], events: PeerEvents) -> CallResult<Arc<dyn PeerTransport>>;
}

/// One peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> CallResult<SessionDescription>;
    async fn create_answer(&self) -> CallResult<SessionDescription>;
    async fn set_local_description(&self, desc: &SessionDescription) -> CallResult<()>;
    async fn set_remote_description(&self, desc: &SessionDescription) -> CallResult<()>;
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> CallResult<()>;
    async fn close(&self) -> CallResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!PeerState::New.is_terminal());
        assert!(!PeerState::Negotiating.is_terminal());
        assert!(!PeerState::Connected.is_terminal());
        assert!(PeerState::Disconnected.is_terminal());
        assert!(PeerState::Failed.is_terminal());
        assert!(PeerState::Closed.is_terminal());
    }

    #[tokio::test]
    async fn test_events_carry_connection_identity() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = PeerEvents::new(tx, "77", 3);
        events.emit(PeerEventKind::StateChanged(PeerState::Connected));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.participant_id, "77");
        assert_eq!(event.connection_id, 3);
        assert!(matches!(event.kind, PeerEventKind::StateChanged(PeerState::Connected)));
    }
}
