#![forbid(unsafe_code)]

// webrtc-rs implementation of the peer connection seam.
// One RTCPeerConnection per remote participant, trickle ICE, single STUN server.

use super::{PeerEventKind, PeerEvents, PeerFactory, PeerState, PeerTransport};
use crate::error::{CallError, CallResult};
use crate::media::config::{opus_capability, vp8_capability, OPUS_PAYLOAD_TYPE, VP8_PAYLOAD_TYPE};
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds peer connections from a shared media engine
pub struct WebRtcPeerFactory {
    api: API,
    stun_url: String,
}

impl WebRtcPeerFactory {
    /// Creates the factory with Opus + VP8 and the default interceptors.
    pub fn new(stun_url: impl Into<String>) -> CallResult<Self> {
        let mut media_engine = MediaEngine::default();

        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: OPUS_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .context("Failed to register Opus codec")?;

        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: vp8_capability(),
                    payload_type: VP8_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .context("Failed to register VP8 codec")?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .context("Failed to register interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            stun_url: stun_url.into(),
        })
    }

    fn configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![self.stun_url.clone()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self, local_tracks: &[LocalTrack], events: PeerEvents) -> CallResult<Arc<dyn PeerTransport>> {
        let participant_id = events.participant_id().to_string();
        debug!("Creating peer connection for {} (#{})", participant_id, events.connection_id());

        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .context("Failed to create peer connection")?,
        );

        // Tracks go in before any offer/answer so they get an m-line and a binding
        for track in local_tracks {
            let rtp_sender = peer_connection
                .add_track(track.rtp() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .with_context(|| format!("Failed to add {} track", track.kind()))?;

            let label = format!("{}/{}", participant_id, track.id());
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
                debug!("{}: RTCP reader stopped", label);
            });
        }

        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => events.emit(PeerEventKind::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => warn!("{}: failed to serialize ICE candidate: {}", events.participant_id(), e),
                }
            })
        }));

        // The returned future must finish quickly: webrtc-rs holds the handler
        // lock while awaiting it, so the read loop runs in its own task.
        let track_events = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        other => {
                            warn!("{}: ignoring remote track of kind {}", events.participant_id(), other);
                            return;
                        }
                    };
                    let remote = RemoteTrack::new(track.id(), track.stream_id(), kind);
                    info!(
                        "{}: remote {} track {} ({})",
                        events.participant_id(),
                        kind,
                        remote.id,
                        track.codec().capability.mime_type
                    );

                    let counter = remote.clone();
                    let label = events.participant_id().to_string();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 1500];
                        while track.read(&mut buf).await.is_ok() {
                            counter.record_packet();
                        }
                        debug!(
                            "{}: remote track {} ended after {} packets",
                            label,
                            counter.id,
                            counter.packets_received()
                        );
                    });

                    events.emit(PeerEventKind::RemoteTrack(remote));
                })
            },
        ));

        let state_events = events;
        peer_connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                let mapped = match state {
                    RTCPeerConnectionState::New => PeerState::New,
                    RTCPeerConnectionState::Connecting => PeerState::Negotiating,
                    RTCPeerConnectionState::Connected => PeerState::Connected,
                    RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                    RTCPeerConnectionState::Failed => PeerState::Failed,
                    RTCPeerConnectionState::Closed => PeerState::Closed,
                    _ => return,
                };
                match mapped {
                    PeerState::Failed => error!("{}: peer connection failed", events.participant_id()),
                    PeerState::Disconnected => warn!("{}: peer connection disconnected", events.participant_id()),
                    _ => debug!("{}: peer connection {}", events.participant_id(), mapped),
                }
                events.emit(PeerEventKind::StateChanged(mapped));
            })
        }));

        Ok(Arc::new(WebRtcPeer {
            peer_connection,
            participant_id,
        }))
    }
}

/// A live RTCPeerConnection to one participant
struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    participant_id: String,
}

fn to_rtc(desc: &SessionDescription) -> CallResult<RTCSessionDescription> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    parsed.map_err(|e| CallError::Transport(format!("invalid {:?} SDP: {e}", desc.kind)))
}

fn from_rtc(desc: RTCSessionDescription) -> CallResult<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(CallError::Transport(format!("unexpected SDP type {other}"))),
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn create_offer(&self) -> CallResult<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| CallError::Transport(format!("{}: create offer: {e}", self.participant_id)))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> CallResult<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| CallError::Transport(format!("{}: create answer: {e}", self.participant_id)))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> CallResult<()> {
        self.peer_connection
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| CallError::Transport(format!("{}: set local description: {e}", self.participant_id)))
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> CallResult<()> {
        self.peer_connection
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| CallError::Transport(format!("{}: set remote description: {e}", self.participant_id)))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> CallResult<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| CallError::Transport(format!("{}: add ICE candidate: {e}", self.participant_id)))
    }

    async fn close(&self) -> CallResult<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| CallError::Transport(format!("{}: close: {e}", self.participant_id)))?;
        debug!("{}: peer connection closed", self.participant_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{LocalCapture, MediaKind};
    use crate::rtc::PeerEvent;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_offer_carries_local_tracks() {
        let factory = WebRtcPeerFactory::new("stun:stun.l.google.com:19302").unwrap();
        let capture = LocalCapture::new(MediaKind::Video, "neo");
        let (tx, _rx) = mpsc::unbounded_channel::<PeerEvent>();

        let peer = factory
            .create(capture.tracks(), PeerEvents::new(tx, "trinity", 1))
            .await
            .unwrap();
        let offer = peer.create_offer().await.unwrap();

        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        assert!(offer.sdp.contains("opus/48000/2"));
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_answer_without_remote_offer_fails() {
        let factory = WebRtcPeerFactory::new("stun:stun.l.google.com:19302").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel::<PeerEvent>();
        let peer = factory.create(&[], PeerEvents::new(tx, "trinity", 1)).await.unwrap();

        assert!(matches!(peer.create_answer().await, Err(CallError::Transport(_))));
        peer.close().await.unwrap();
    }

    #[test]
    fn test_rejects_malformed_sdp() {
        assert!(matches!(
            to_rtc(&SessionDescription::offer("not sdp")),
            Err(CallError::Transport(_))
        ));
    }
}
