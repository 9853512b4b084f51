#![forbid(unsafe_code)]

// Mesh module - full-mesh peer coordination for one call session
//
// The Mesh is owned by a single session task. Signaling frames, peer
// callbacks and commands are applied one at a time, so the entry and media
// maps need no locking.

pub mod entry;
pub mod ordering;
pub mod snapshot;

pub use entry::{NegotiationRole, PeerEntry};
pub use ordering::{compare_ids, initiates};
pub use snapshot::{MeshSnapshot, PeerSummary, SessionInfo};

use crate::error::{CallError, CallResult};
use crate::media::{LocalCapture, MediaKind, RemoteMedia, TrackKind};
use crate::metrics::MeshMetrics;
use crate::rtc::{PeerEvent, PeerEventKind, PeerEvents, PeerFactory, PeerState, PeerTransport};
use crate::signaling::{IceCandidate, LinkSender, Participant, SdpKind, SessionDescription, SignalMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct Mesh {
    info: SessionInfo,
    capture: Option<LocalCapture>,
    signals: LinkSender,
    factory: Arc<dyn PeerFactory>,
    events: mpsc::UnboundedSender<PeerEvent>,
    metrics: MeshMetrics,
    snapshots: Arc<watch::Sender<MeshSnapshot>>,
    roster: Vec<Participant>,
    peers: HashMap<String, PeerEntry>,
    remote_media: HashMap<String, RemoteMedia>,
    next_connection_id: u64,
    ended: bool,
}

impl Mesh {
    pub fn new(
        info: SessionInfo,
        capture: LocalCapture,
        signals: LinkSender,
        factory: Arc<dyn PeerFactory>,
        events: mpsc::UnboundedSender<PeerEvent>,
        metrics: MeshMetrics,
        snapshots: Arc<watch::Sender<MeshSnapshot>>,
    ) -> Self {
        let mesh = Self {
            info,
            capture: Some(capture),
            signals,
            factory,
            events,
            metrics,
            snapshots,
            roster: Vec::new(),
            peers: HashMap::new(),
            remote_media: HashMap::new(),
            next_connection_id: 0,
            ended: false,
        };
        mesh.publish();
        mesh
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    fn local_id(&self) -> &str {
        &self.info.local_participant_id
    }

    pub fn roster(&self) -> &[Participant] {
        &self.roster
    }

    pub fn peer(&self, participant_id: &str) -> Option<&PeerEntry> {
        self.peers.get(participant_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn remote_media(&self, participant_id: &str) -> Option<&RemoteMedia> {
        self.remote_media.get(participant_id)
    }

    pub fn capture(&self) -> Option<&LocalCapture> {
        self.capture.as_ref()
    }

    // --- Signaling ---

    /// Apply one inbound signaling message.
    pub async fn on_signal(&mut self, msg: SignalMessage) {
        if let Some(target) = msg.target() {
            if target != self.local_id() {
                debug!("Ignoring {} addressed to {}", msg.label(), target);
                return;
            }
        }

        match msg {
            SignalMessage::VoiceParticipants { participants } => {
                self.on_roster(MediaKind::Voice, participants).await;
            }
            SignalMessage::VideoParticipants { participants } => {
                self.on_roster(MediaKind::Video, participants).await;
            }
            SignalMessage::Offer { sender, sdp, .. } => self.on_offer(sender, sdp).await,
            SignalMessage::Answer { sender, sdp, .. } => self.on_answer(sender, sdp).await,
            SignalMessage::Candidate { sender, candidate, .. } => self.on_candidate(sender, candidate).await,
        }
        self.publish();
    }

    async fn on_roster(&mut self, kind: MediaKind, participants: Vec<Participant>) {
        if kind != self.info.kind {
            warn!(
                "Ignoring {} roster in {} session {}",
                kind, self.info.kind, self.info.session_id
            );
            return;
        }

        debug!(
            "Roster for {}: {} participant(s)",
            self.info.room_key,
            participants.len()
        );
        self.roster = participants;

        let present: HashSet<&str> = self.roster.iter().map(|p| p.id.as_str()).collect();
        let gone: Vec<String> = self
            .peers
            .keys()
            .chain(self.remote_media.keys())
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for participant_id in gone {
            info!("{} left {}", participant_id, self.info.room_key);
            self.dispose(&participant_id).await;
        }

        let ids: Vec<String> = self.roster.iter().map(|p| p.id.clone()).collect();
        for participant_id in ids {
            if participant_id == self.local_id() || self.peers.contains_key(&participant_id) {
                continue;
            }
            if !initiates(self.local_id(), &participant_id) {
                debug!("Waiting for {} to offer", participant_id);
                continue;
            }
            if let Err(e) = self.offer_to(&participant_id).await {
                warn!("Offer to {} failed: {}", participant_id, e);
                self.metrics.inc_errors();
                self.dispose(&participant_id).await;
            }
        }
    }

    async fn offer_to(&mut self, participant_id: &str) -> CallResult<()> {
        let transport = self.create_entry(participant_id, NegotiationRole::Initiator).await?;
        self.set_state(participant_id, PeerState::Negotiating);

        let offer = transport.create_offer().await?;
        transport.set_local_description(&offer).await?;
        self.send(SignalMessage::Offer {
            target: participant_id.to_string(),
            sender: self.local_id().to_string(),
            sdp: offer,
        })?;
        self.metrics.inc_offers_sent();
        info!("Sent offer to {}", participant_id);
        Ok(())
    }

    async fn on_offer(&mut self, sender: String, sdp: SessionDescription) {
        match self.peers.get(&sender).map(|entry| entry.role) {
            Some(NegotiationRole::Initiator) => {
                warn!("Dropping offer from {}: local side initiates this pair", sender);
                return;
            }
            Some(NegotiationRole::Responder) => {
                info!("{} restarted negotiation, replacing its connection", sender);
                self.dispose(&sender).await;
            }
            None => {}
        }

        if let Err(e) = self.answer(&sender, sdp).await {
            warn!("Answering {} failed: {}", sender, e);
            self.metrics.inc_errors();
            self.dispose(&sender).await;
        }
    }

    async fn answer(&mut self, sender: &str, offer: SessionDescription) -> CallResult<()> {
        if offer.kind != SdpKind::Offer {
            return Err(CallError::Transport(format!("offer from {sender} carried an answer SDP")));
        }
        let transport = self.create_entry(sender, NegotiationRole::Responder).await?;
        self.set_state(sender, PeerState::Negotiating);

        transport.set_remote_description(&offer).await?;
        let answer = transport.create_answer().await?;
        transport.set_local_description(&answer).await?;
        self.send(SignalMessage::Answer {
            target: sender.to_string(),
            sender: self.local_id().to_string(),
            sdp: answer,
        })?;
        self.metrics.inc_answers_sent();
        info!("Sent answer to {}", sender);
        Ok(())
    }

    async fn on_answer(&mut self, sender: String, sdp: SessionDescription) {
        let Some(transport) = self.peers.get(&sender).map(|entry| entry.transport.clone()) else {
            let race = CallError::NegotiationRace {
                participant_id: sender,
                kind: "answer",
            };
            warn!("{}", race);
            self.metrics.inc_negotiation_races();
            return;
        };
        if let Err(e) = transport.set_remote_description(&sdp).await {
            warn!("Applying answer from {} failed: {}", sender, e);
            self.metrics.inc_errors();
        }
    }

    async fn on_candidate(&mut self, sender: String, candidate: IceCandidate) {
        let Some(transport) = self.peers.get(&sender).map(|entry| entry.transport.clone()) else {
            debug!("Dropping candidate from {}: no peer", sender);
            self.metrics.inc_candidates_dropped();
            return;
        };
        if let Err(e) = transport.add_ice_candidate(&candidate).await {
            warn!("Adding candidate from {} failed: {}", sender, e);
            self.metrics.inc_errors();
        }
    }

    // --- Peer callbacks ---

    /// Apply one callback from a peer connection.
    pub async fn on_peer_event(&mut self, event: PeerEvent) {
        let PeerEvent {
            participant_id,
            connection_id,
            kind,
        } = event;

        let live = self
            .peers
            .get(&participant_id)
            .is_some_and(|entry| entry.connection_id == connection_id);
        if !live {
            debug!("Ignoring stale event from {} (#{})", participant_id, connection_id);
            return;
        }

        match kind {
            PeerEventKind::LocalCandidate(candidate) => {
                let msg = SignalMessage::Candidate {
                    target: participant_id.clone(),
                    sender: self.local_id().to_string(),
                    candidate,
                };
                match self.send(msg) {
                    Ok(()) => self.metrics.inc_candidates_sent(),
                    Err(e) => {
                        warn!("Could not send candidate to {}: {}", participant_id, e);
                        self.metrics.inc_errors();
                    }
                }
                return;
            }
            PeerEventKind::RemoteTrack(track) => {
                debug!("{} track {} from {}", track.kind, track.id, participant_id);
                self.remote_media
                    .entry(participant_id.clone())
                    .or_insert_with(|| RemoteMedia::new(participant_id.clone()))
                    .add_track(track);
            }
            PeerEventKind::StateChanged(state) => self.on_state_change(&participant_id, state).await,
        }
        self.publish();
    }

    async fn on_state_change(&mut self, participant_id: &str, state: PeerState) {
        let Some(entry) = self.peers.get_mut(participant_id) else { return };
        entry.state = state;

        if state == PeerState::Connected {
            let elapsed = entry.created_at.elapsed();
            self.metrics.observe_negotiation(elapsed);
            info!("Connected to {} in {:?} ({})", participant_id, elapsed, entry.role);
        } else if state.is_terminal() {
            let lost = CallError::PeerLost {
                participant_id: participant_id.to_string(),
                state: state.to_string(),
            };
            warn!("{}", lost);
            self.metrics.inc_peers_lost();
            self.dispose(participant_id).await;
        }
    }

    // --- Local media ---

    /// Flip the local audio track. None without a capture.
    pub fn toggle_audio(&mut self) -> Option<bool> {
        self.toggle(TrackKind::Audio)
    }

    /// Flip the local video track. None without a capture or in a voice call.
    pub fn toggle_video(&mut self) -> Option<bool> {
        self.toggle(TrackKind::Video)
    }

    fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let enabled = self.capture.as_ref()?.toggle(kind)?;
        info!("Local {} {}", kind, if enabled { "enabled" } else { "disabled" });
        self.publish();
        Some(enabled)
    }

    // --- Teardown ---

    /// Stop local capture, close every peer and forget all remote media.
    pub async fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        let entries: Vec<PeerEntry> = self.peers.drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            close_entry(entry).await;
        }
        self.remote_media.clear();
        self.roster.clear();
        self.ended = true;
        info!("Session {} torn down", self.info.session_id);
        self.publish();
    }

    // --- Internals ---

    async fn create_entry(&mut self, participant_id: &str, role: NegotiationRole) -> CallResult<Arc<dyn PeerTransport>> {
        self.next_connection_id += 1;
        let connection_id = self.next_connection_id;

        let tracks = self.capture.as_ref().map(LocalCapture::tracks).unwrap_or(&[]);
        let events = PeerEvents::new(self.events.clone(), participant_id, connection_id);
        let transport = self.factory.create(tracks, events).await?;

        let entry = PeerEntry::new(
            participant_id,
            connection_id,
            role,
            transport.clone(),
            self.metrics.peer_active_guard(),
        );
        debug!("Created {} entry for {} (#{})", role, participant_id, connection_id);
        self.peers.insert(participant_id.to_string(), entry);
        Ok(transport)
    }

    fn set_state(&mut self, participant_id: &str, state: PeerState) {
        if let Some(entry) = self.peers.get_mut(participant_id) {
            entry.state = state;
        }
    }

    async fn dispose(&mut self, participant_id: &str) {
        if let Some(entry) = self.peers.remove(participant_id) {
            close_entry(entry).await;
        }
        self.remote_media.remove(participant_id);
    }

    fn send(&self, msg: SignalMessage) -> CallResult<()> {
        self.signals.send_json(&msg)?;
        self.metrics.inc_signals_sent();
        Ok(())
    }

    pub fn snapshot(&self) -> MeshSnapshot {
        if self.ended {
            return MeshSnapshot::default();
        }

        let mut peers: Vec<PeerSummary> = self
            .peers
            .values()
            .map(|entry| PeerSummary {
                participant_id: entry.participant_id.clone(),
                role: entry.role,
                state: entry.state,
            })
            .collect();
        peers.sort_by(|a, b| compare_ids(&a.participant_id, &b.participant_id));

        let mut remote_media: Vec<RemoteMedia> = self.remote_media.values().cloned().collect();
        remote_media.sort_by(|a, b| compare_ids(&a.participant_id, &b.participant_id));

        let capture = self.capture.as_ref();
        MeshSnapshot {
            session: Some(self.info.clone()),
            roster: self.roster.clone(),
            peers,
            remote_media,
            audio_enabled: capture.and_then(|c| c.is_enabled(TrackKind::Audio)),
            video_enabled: capture.and_then(|c| c.is_enabled(TrackKind::Video)),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}

async fn close_entry(entry: PeerEntry) {
    if let Err(e) = entry.transport.close().await {
        debug!("Closing {} failed: {}", entry.participant_id, e);
    }
}
