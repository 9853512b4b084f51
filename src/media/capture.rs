#![forbid(unsafe_code)]

// Local capture - the tracks this participant sends to every peer

use super::config::{opus_capability, vp8_capability};
use super::{MediaKind, TrackKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

#[derive(Debug)]
struct TrackState {
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// One outgoing track.
///
/// Clones share the enabled/stopped flags, so a clone attached to a peer
/// connection observes toggles made through the capture.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    rtp: Arc<TrackLocalStaticRTP>,
    state: Arc<TrackState>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, owner_id: &str) -> Self {
        let codec = match kind {
            TrackKind::Audio => opus_capability(),
            TrackKind::Video => vp8_capability(),
        };
        let id = format!("{kind}-{owner_id}");
        let rtp = Arc::new(TrackLocalStaticRTP::new(
            codec,
            id.clone(),
            format!("stream-{owner_id}"),
        ));
        Self {
            id,
            kind,
            rtp,
            state: Arc::new(TrackState {
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// RTP sink added to each peer connection
    pub fn rtp(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.rtp)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.state.stopped.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Local audio (and video) capture for one call session.
///
/// Owns the tasks that feed its tracks. Stopping is idempotent and also
/// happens on drop, so the capture is released exactly once.
#[derive(Debug)]
pub struct LocalCapture {
    kind: MediaKind,
    tracks: Vec<LocalTrack>,
    pumps: Vec<JoinHandle<()>>,
}

impl LocalCapture {
    /// Creates one track per kind the call needs.
    pub fn new(kind: MediaKind, owner_id: &str) -> Self {
        let tracks = kind
            .track_kinds()
            .iter()
            .map(|&track_kind| LocalTrack::new(track_kind, owner_id))
            .collect();
        Self {
            kind,
            tracks,
            pumps: Vec::new(),
        }
    }

    /// Attach a task feeding the tracks; aborted on stop.
    pub fn attach_pump(&mut self, pump: JoinHandle<()>) {
        self.pumps.push(pump);
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    /// Enabled state of the first track of `kind`, if any.
    pub fn is_enabled(&self, kind: TrackKind) -> Option<bool> {
        self.track(kind).map(LocalTrack::is_enabled)
    }

    /// Flip the enabled flag of every track of `kind` in place.
    /// Returns the new state, or None if the capture has no such track.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let enabled = !self.is_enabled(kind)?;
        for track in self.tracks.iter().filter(|t| t.kind == kind) {
            track.set_enabled(enabled);
        }
        Some(enabled)
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(LocalTrack::is_stopped)
    }

    /// Stop every track and the tasks feeding them.
    pub fn stop(&mut self) {
        if self.is_stopped() && self.pumps.is_empty() {
            return;
        }
        for track in &self.tracks {
            track.stop();
        }
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        debug!("Local {} capture stopped ({} tracks)", self.kind, self.tracks.len());
    }
}

impl Drop for LocalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_capture_has_both_tracks() {
        let capture = LocalCapture::new(MediaKind::Video, "neo");
        assert_eq!(capture.tracks().len(), 2);
        assert_eq!(capture.track(TrackKind::Audio).unwrap().id(), "audio-neo");
        assert_eq!(capture.track(TrackKind::Video).unwrap().id(), "video-neo");
    }

    #[test]
    fn test_toggle_flips_only_enabled_flag() {
        let capture = LocalCapture::new(MediaKind::Video, "neo");
        let shared = capture.track(TrackKind::Video).unwrap().clone();

        assert_eq!(capture.toggle(TrackKind::Video), Some(false));
        assert!(!shared.is_enabled());
        assert!(!shared.is_stopped());
        assert_eq!(capture.is_enabled(TrackKind::Audio), Some(true));

        assert_eq!(capture.toggle(TrackKind::Video), Some(true));
        assert!(shared.is_enabled());
    }

    #[test]
    fn test_voice_capture_has_no_video_to_toggle() {
        let capture = LocalCapture::new(MediaKind::Voice, "neo");
        assert_eq!(capture.toggle(TrackKind::Video), None);
    }

    #[tokio::test]
    async fn test_stop_aborts_pumps_and_marks_tracks() {
        let mut capture = LocalCapture::new(MediaKind::Voice, "neo");
        let audio = capture.track(TrackKind::Audio).unwrap().clone();
        let pump = tokio::spawn(std::future::pending::<()>());
        capture.attach_pump(pump);

        capture.stop();
        assert!(capture.is_stopped());
        assert!(audio.is_stopped());
        capture.stop();
    }
}
