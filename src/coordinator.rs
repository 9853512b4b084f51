#![forbid(unsafe_code)]

// Call coordinator - starts and ends call sessions for one local identity

use crate::chat::{CallNotice, ChatChannel};
use crate::config::ClientConfig;
use crate::error::CallResult;
use crate::identity::LocalIdentity;
use crate::media::{MediaDevices, MediaKind};
use crate::mesh::{Mesh, MeshSnapshot, SessionInfo};
use crate::metrics::MeshMetrics;
use crate::rtc::PeerFactory;
use crate::session::{self, SessionHandle};
use crate::signaling::Connector;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Entry point for the presentation layer.
///
/// Holds at most one session; voice and video calls are mutually exclusive.
pub struct CallCoordinator {
    config: ClientConfig,
    identity: LocalIdentity,
    connector: Arc<dyn Connector>,
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerFactory>,
    chat: Option<ChatChannel>,
    session: Option<SessionHandle>,
    metrics: MeshMetrics,
    snapshots: Arc<watch::Sender<MeshSnapshot>>,
}

impl CallCoordinator {
    pub fn new(
        config: ClientConfig,
        identity: LocalIdentity,
        connector: Arc<dyn Connector>,
        devices: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        let (snapshots, _) = watch::channel(MeshSnapshot::default());
        Self {
            config,
            identity,
            connector,
            devices,
            peers,
            chat: None,
            session: None,
            metrics: MeshMetrics::new(),
            snapshots: Arc::new(snapshots),
        }
    }

    /// Chat channel used for call notices.
    pub fn set_chat(&mut self, chat: Option<ChatChannel>) -> Option<ChatChannel> {
        std::mem::replace(&mut self.chat, chat)
    }

    pub fn chat(&self) -> Option<&ChatChannel> {
        self.chat.as_ref()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn metrics(&self) -> &MeshMetrics {
        &self.metrics
    }

    pub fn subscribe(&self) -> watch::Receiver<MeshSnapshot> {
        self.snapshots.subscribe()
    }

    /// The running session, if its task is still alive.
    pub fn active(&self) -> Option<&SessionInfo> {
        self.session
            .as_ref()
            .filter(|handle| !handle.is_finished())
            .map(SessionHandle::info)
    }

    /// Start a call in `room_key`, ending any current call first.
    ///
    /// # Errors
    /// `MediaAccessDenied` if capture fails, `SignalingUnavailable` if the
    /// signaling endpoint cannot be reached. No session is left active.
    pub async fn start_session(&mut self, room_key: &str, kind: MediaKind) -> CallResult<SessionInfo> {
        if let Some(current) = self.session.as_ref() {
            if !current.is_finished() {
                info!(
                    "Ending {} call in {} before starting {} call",
                    current.info().kind,
                    current.info().room_key,
                    kind
                );
            }
            self.end_session().await;
        }

        let participant_id = self.identity.participant_id();
        let mut capture = self.devices.acquire(kind).await.inspect_err(|e| {
            warn!("Cannot start {} call in {}: {}", kind, room_key, e);
        })?;

        let connected = match self
            .config
            .signaling_url(kind, room_key, &participant_id, &self.identity.display_name)
        {
            Ok(url) => self.connector.connect(&url).await,
            Err(e) => Err(e),
        };
        let link = match connected {
            Ok(link) => link,
            Err(e) => {
                warn!("Cannot start {} call in {}: {}", kind, room_key, e);
                capture.stop();
                return Err(e);
            }
        };

        let info = SessionInfo::new(room_key, kind, participant_id);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mesh = Mesh::new(
            info.clone(),
            capture,
            link.sender(),
            self.peers.clone(),
            events_tx,
            self.metrics.clone(),
            self.snapshots.clone(),
        );
        let notices = self.chat.as_ref().map(ChatChannel::notices);
        self.session = Some(session::spawn(mesh, link, events_rx, self.metrics.clone(), notices));
        self.metrics.inc_sessions_started();
        self.notify(CallNotice::Started(kind));
        Ok(info)
    }

    /// Leave the current call. No-op when idle.
    ///
    /// The session posts its own ended notice, so a call the server already
    /// hung up on is not announced twice.
    pub async fn end_session(&mut self) {
        let Some(handle) = self.session.take() else { return };
        handle.end().await;
    }

    /// Flip local audio. None when idle.
    pub async fn toggle_local_audio(&self) -> Option<bool> {
        self.session.as_ref()?.toggle_audio().await
    }

    /// Flip local video. None when idle or in a voice call.
    pub async fn toggle_local_video(&self) -> Option<bool> {
        self.session.as_ref()?.toggle_video().await
    }

    fn notify(&self, notice: CallNotice) {
        if let Some(chat) = &self.chat {
            chat.notify(notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::signaling::{Participant, SessionDescription, SignalMessage};
    use crate::testing::{MemoryConnector, MockDevices, MockPeerFactory, RemoteEnd};
    use std::time::Duration;

    struct Fixture {
        coordinator: CallCoordinator,
        connector: Arc<MemoryConnector>,
        devices: Arc<MockDevices>,
        peers: Arc<MockPeerFactory>,
        chat: Option<RemoteEnd>,
    }

    async fn fixture(username: &str) -> Fixture {
        let connector = MemoryConnector::new();
        let devices = MockDevices::new();
        let peers = MockPeerFactory::new();
        let mut coordinator = CallCoordinator::new(
            ClientConfig::default(),
            LocalIdentity::new("0a-user", username).with_display_name("Neo Anderson"),
            connector.clone(),
            devices.clone(),
            peers.clone(),
        );
        let chat = ChatChannel::open(&*connector, &ClientConfig::default(), "general", "10")
            .await
            .unwrap();
        coordinator.set_chat(Some(chat));
        let chat = Some(connector.take_remote());
        Fixture {
            coordinator,
            connector,
            devices,
            peers,
            chat,
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<MeshSnapshot>, what: impl Fn(&MeshSnapshot) -> bool) {
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| what(s)))
            .await
            .expect("snapshot condition not reached")
            .expect("snapshot sender dropped");
    }

    fn roster(kind: MediaKind, ids: &[&str]) -> SignalMessage {
        let participants = ids.iter().map(|id| Participant::new(*id, *id)).collect();
        match kind {
            MediaKind::Voice => SignalMessage::VoiceParticipants { participants },
            MediaKind::Video => SignalMessage::VideoParticipants { participants },
        }
    }

    #[tokio::test]
    async fn test_start_opens_scoped_signaling_and_posts_notice() {
        let mut f = fixture("10").await;
        let info = f.coordinator.start_session("general", MediaKind::Video).await.unwrap();

        assert_eq!(info.local_participant_id, "10");
        assert_eq!(f.coordinator.active(), Some(&info));
        let signaling = f.connector.take_remote();
        assert_eq!(
            signaling.url.as_str(),
            "ws://localhost:8000/ws/video/general/10?name=Neo+Anderson"
        );
        let chat = f.chat.as_mut().unwrap();
        assert_eq!(chat.next_text().await.as_deref(), Some("STARTED_VIDEO_STREAM"));
        assert_eq!(f.devices.live_tracks(), 2);
    }

    #[tokio::test]
    async fn test_pair_negotiates_through_signaling() {
        let mut f = fixture("10").await;
        f.coordinator.start_session("general", MediaKind::Video).await.unwrap();
        let mut signaling = f.connector.take_remote();
        let mut rx = f.coordinator.subscribe();

        signaling.push(&roster(MediaKind::Video, &["10", "77"])).await;
        match signaling.next_message().await {
            Some(SignalMessage::Offer { target, sender, .. }) => {
                assert_eq!(target, "77");
                assert_eq!(sender, "10");
            }
            other => panic!("expected offer, got {other:?}"),
        }

        signaling
            .push(&SignalMessage::Answer {
                target: "10".into(),
                sender: "77".into(),
                sdp: SessionDescription::answer("v=0"),
            })
            .await;
        wait_for(&mut rx, |s| s.roster.len() == 2 && s.peer("77").is_some()).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while f.peers.count("set_remote 77") == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.coordinator.metrics().snapshot().signals_received, 2);
    }

    #[tokio::test]
    async fn test_leave_clears_roster_and_posts_ended_notice() {
        let mut f = fixture("10").await;
        f.coordinator.start_session("general", MediaKind::Video).await.unwrap();
        let mut signaling = f.connector.take_remote();
        let mut rx = f.coordinator.subscribe();
        signaling.push(&roster(MediaKind::Video, &["10", "77"])).await;
        signaling.next_message().await.unwrap();
        wait_for(&mut rx, |s| s.roster.len() == 2).await;

        f.coordinator.end_session().await;

        let snapshot = rx.borrow().clone();
        assert!(!snapshot.is_active());
        assert!(snapshot.roster.is_empty());
        assert!(snapshot.peers.is_empty());
        assert!(f.coordinator.active().is_none());
        assert_eq!(f.devices.live_tracks(), 0);
        assert_eq!(f.peers.count("close 77"), 1);
        assert!(signaling.is_closed());

        let chat = f.chat.as_mut().unwrap();
        assert_eq!(chat.next_text().await.as_deref(), Some("STARTED_VIDEO_STREAM"));
        assert_eq!(chat.next_text().await.as_deref(), Some("ENDED_VIDEO_STREAM"));
        assert_eq!(f.coordinator.metrics().snapshot().sessions_ended, 1);
    }

    #[tokio::test]
    async fn test_voice_start_ends_video_first() {
        let mut f = fixture("10").await;
        f.coordinator.start_session("general", MediaKind::Video).await.unwrap();
        let video_signaling = f.connector.take_remote();

        let info = f.coordinator.start_session("general", MediaKind::Voice).await.unwrap();
        let voice_signaling = f.connector.take_remote();

        assert!(video_signaling.is_closed());
        assert!(!voice_signaling.is_closed());
        assert!(voice_signaling.url.path().starts_with("/ws/voice/general/10"));
        assert_eq!(info.kind, MediaKind::Voice);
        // Two video tracks stopped, one voice track live
        assert_eq!(f.devices.tracks().len(), 3);
        assert_eq!(f.devices.live_tracks(), 1);

        let chat = f.chat.as_mut().unwrap();
        let notices = [
            chat.next_text().await,
            chat.next_text().await,
            chat.next_text().await,
        ];
        assert_eq!(
            notices.map(Option::unwrap),
            ["STARTED_VIDEO_STREAM", "ENDED_VIDEO_STREAM", "STARTED_VOICE_STREAM"].map(String::from)
        );
    }

    #[tokio::test]
    async fn test_denied_capture_leaves_no_session() {
        let mut f = fixture("10").await;
        f.devices.deny(true);

        let result = f.coordinator.start_session("general", MediaKind::Video).await;

        assert!(matches!(result, Err(CallError::MediaAccessDenied(_))));
        assert!(f.coordinator.active().is_none());
        assert!(f.connector.urls().iter().all(|u| !u.path().starts_with("/ws/video")));
    }

    #[tokio::test]
    async fn test_unreachable_signaling_releases_capture() {
        let mut f = fixture("10").await;
        f.connector.fail(true);

        let result = f.coordinator.start_session("general", MediaKind::Voice).await;

        assert!(matches!(result, Err(CallError::SignalingUnavailable(_))));
        assert!(f.coordinator.active().is_none());
        assert_eq!(f.devices.tracks().len(), 1);
        assert_eq!(f.devices.live_tracks(), 0);
    }

    #[tokio::test]
    async fn test_server_hangup_ends_session() {
        let mut f = fixture("10").await;
        f.coordinator.start_session("general", MediaKind::Voice).await.unwrap();
        let mut rx = f.coordinator.subscribe();
        wait_for(&mut rx, |s| s.is_active()).await;

        f.connector.take_remote().hang_up();

        wait_for(&mut rx, |s| !s.is_active()).await;
        assert_eq!(f.devices.live_tracks(), 0);

        let chat = f.chat.as_mut().unwrap();
        assert_eq!(chat.next_text().await.as_deref(), Some("STARTED_VOICE_STREAM"));
        assert_eq!(chat.next_text().await.as_deref(), Some("ENDED_VOICE_STREAM"));

        // Ending after the fact is still clean and not announced again
        f.coordinator.end_session().await;
        assert!(f.coordinator.active().is_none());
        assert!(f.chat.as_mut().unwrap().drain_texts().is_empty());
    }

    #[tokio::test]
    async fn test_toggles_route_to_session() {
        let mut f = fixture("10").await;
        assert_eq!(f.coordinator.toggle_local_audio().await, None);

        f.coordinator.start_session("general", MediaKind::Voice).await.unwrap();
        assert_eq!(f.coordinator.toggle_local_audio().await, Some(false));
        assert_eq!(f.coordinator.toggle_local_video().await, None);
        assert_eq!(f.coordinator.toggle_local_audio().await, Some(true));
        assert_eq!(f.devices.live_tracks(), 1);
    }

    #[tokio::test]
    async fn test_end_when_idle_is_noop() {
        let mut f = fixture("10").await;
        f.coordinator.end_session().await;
        assert!(f.chat.as_mut().unwrap().drain_texts().is_empty());
        assert_eq!(f.coordinator.metrics().snapshot().sessions_ended, 0);
    }
}
