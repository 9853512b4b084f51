#![forbid(unsafe_code)]

// Signaling protocol - JSON envelopes exchanged on the room-scoped call channel

use serde::{Deserialize, Deserializer, Serialize};

/// Messages carried on the call signaling channel.
///
/// The server broadcasts rosters to the whole room and relays negotiation
/// envelopes without point-to-point addressing, so every negotiation variant
/// names its `target` and receivers filter on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    /// Current membership of a voice room
    VoiceParticipants {
        participants: Vec<Participant>,
    },
    /// Current membership of a video room
    VideoParticipants {
        participants: Vec<Participant>,
    },
    /// SDP offer from the initiating side of a pair
    Offer {
        target: String,
        sender: String,
        sdp: SessionDescription,
    },
    /// SDP answer from the responding side of a pair
    Answer {
        target: String,
        sender: String,
        sdp: SessionDescription,
    },
    /// Trickled ICE candidate
    Candidate {
        target: String,
        sender: String,
        candidate: IceCandidate,
    },
}

impl SignalMessage {
    /// Participant this message is addressed to. Rosters are room-wide.
    pub fn target(&self) -> Option<&str> {
        match self {
            SignalMessage::VoiceParticipants { .. } | SignalMessage::VideoParticipants { .. } => None,
            SignalMessage::Offer { target, .. }
            | SignalMessage::Answer { target, .. }
            | SignalMessage::Candidate { target, .. } => Some(target),
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            SignalMessage::VoiceParticipants { .. } => "voice_participants",
            SignalMessage::VideoParticipants { .. } => "video_participants",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
        }
    }
}

/// Room member as reported by the server roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// SDP kind, serialized the way browsers spell `RTCSdpType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Mirrors the browser `RTCSessionDescriptionInit` JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Mirrors the browser `RTCIceCandidateInit` JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Roster ids come from different backends as either JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Unsigned(n) => n.to_string(),
        Id::Signed(n) => n.to_string(),
    })
}
