#![forbid(unsafe_code)]

// Media module - local capture, remote media handles and capture devices

pub mod capture;
pub mod config;
pub mod remote;
pub mod synthetic;

pub use capture::{LocalCapture, LocalTrack};
pub use config::SyntheticMediaConfig;
pub use remote::{RemoteMedia, RemoteTrack};
pub use synthetic::SyntheticDevices;

use crate::error::CallResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of call: voice is audio only, video is audio plus video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Voice,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Voice => "voice",
            MediaKind::Video => "video",
        }
    }

    /// Track kinds a capture of this kind contains.
    pub fn track_kinds(&self) -> &'static [TrackKind] {
        match self {
            MediaKind::Voice => &[TrackKind::Audio],
            MediaKind::Video => &[TrackKind::Audio, TrackKind::Video],
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "voice" | "audio" => Some(MediaKind::Voice),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a single media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Source of local capture (camera and microphone, or a stand-in).
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a capture for the call kind.
    ///
    /// # Errors
    /// `CallError::MediaAccessDenied` if a required device is missing or refused.
    async fn acquire(&self, kind: MediaKind) -> CallResult<LocalCapture>;
}
