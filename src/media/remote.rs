#![forbid(unsafe_code)]

// Remote media - inbound tracks grouped per participant

use super::TrackKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One inbound track. Clones share the packet counter.
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    packets: Arc<AtomicU64>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            packets: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_packet(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

/// Everything received from one participant, bound as a single object.
#[derive(Debug, Clone)]
pub struct RemoteMedia {
    pub participant_id: String,
    tracks: Vec<RemoteTrack>,
}

impl RemoteMedia {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            tracks: Vec::new(),
        }
    }

    /// Add a track; a track id already present is replaced.
    pub fn add_track(&mut self, track: RemoteTrack) {
        self.tracks.retain(|t| t.id != track.id);
        self.tracks.push(track);
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn audio(&self) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Audio)
    }

    pub fn video(&self) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }
}
