#![forbid(unsafe_code)]

// Synthetic capture device - stands in for camera and microphone on headless hosts.
// Packets are shaped like real Opus/VP8 RTP so peers negotiate and count them normally.

use super::capture::{LocalCapture, LocalTrack};
use super::config::{SyntheticMediaConfig, OPUS_PAYLOAD_TYPE, VP8_PAYLOAD_TYPE};
use super::{MediaDevices, MediaKind, TrackKind};
use crate::error::{CallError, CallResult};
use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use webrtc::track::track_local::TrackLocalWriter;

/// Maximum RTP payload. Chrome uses 1200; 1100 leaves headroom.
const MAX_RTP_PAYLOAD: usize = 1100;
const VP8_DESCRIPTOR_SIZE: usize = 3;
const FRAME_DATA_PER_PACKET: usize = MAX_RTP_PAYLOAD - VP8_DESCRIPTOR_SIZE;
/// Opus TOC + payload for a 20ms silent frame
const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];
/// Inter frame size sent while the camera is off
const BLACK_FRAME_SIZE: usize = 16;

/// Capture devices backed by generated packets
#[derive(Debug, Clone)]
pub struct SyntheticDevices {
    config: SyntheticMediaConfig,
    label: String,
}

impl SyntheticDevices {
    pub fn new(config: SyntheticMediaConfig) -> Self {
        Self {
            config,
            label: "synthetic".to_string(),
        }
    }

    /// Label used in track and stream ids
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn acquire(&self, kind: MediaKind) -> CallResult<LocalCapture> {
        if !self.config.microphone {
            return Err(CallError::MediaAccessDenied("no microphone available".into()));
        }
        if kind == MediaKind::Video && !self.config.camera {
            return Err(CallError::MediaAccessDenied("no camera available".into()));
        }

        let mut capture = LocalCapture::new(kind, &self.label);
        let audio = capture.track(TrackKind::Audio).cloned();
        let video = capture.track(TrackKind::Video).cloned();
        capture.attach_pump(tokio::spawn(pump(self.config.clone(), audio, video)));

        info!("Synthetic {} capture acquired for {}", kind, self.label);
        Ok(capture)
    }
}

/// Feed tracks until they are stopped. Disabled tracks keep flowing as
/// silence / black so the media line stays up.
async fn pump(config: SyntheticMediaConfig, audio: Option<LocalTrack>, video: Option<LocalTrack>) {
    let mut generator = PacketGenerator::new(config.clone());
    let mut audio_interval = tokio::time::interval(config.audio_packet_interval());
    let mut video_interval = tokio::time::interval(config.video_frame_interval());
    audio_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    video_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = audio_interval.tick(), if audio.is_some() => {
                let Some(track) = &audio else { continue };
                if track.is_stopped() {
                    break;
                }
                let packet = generator.audio_packet(track.is_enabled());
                if let Err(e) = track.rtp().write(&packet).await {
                    debug!("{}: audio write failed: {}", track.id(), e);
                }
            }
            _ = video_interval.tick(), if video.is_some() => {
                let Some(track) = &video else { continue };
                if track.is_stopped() {
                    break;
                }
                for packet in generator.video_frame(track.is_enabled()) {
                    if let Err(e) = track.rtp().write(&packet).await {
                        debug!("{}: video write failed: {}", track.id(), e);
                        break;
                    }
                }
            }
        }
    }
    debug!("Synthetic capture pump finished");
}

/// Generates RTP packets. SSRC and payload type are rewritten per binding
/// by the track, so the values here only need to be well formed.
struct PacketGenerator {
    config: SyntheticMediaConfig,
    audio_sequence: u16,
    video_sequence: u16,
    audio_timestamp: u32,
    video_timestamp: u32,
    frame_count: u64,
}

impl PacketGenerator {
    fn new(config: SyntheticMediaConfig) -> Self {
        Self {
            config,
            audio_sequence: 0,
            video_sequence: 0,
            audio_timestamp: 0,
            video_timestamp: 0,
            frame_count: 0,
        }
    }

    fn audio_packet(&mut self, enabled: bool) -> Vec<u8> {
        let payload_size = (self.config.audio_bitrate_kbps * 1000 / 8 / 50) as usize;
        let mut packet = Vec::with_capacity(12 + payload_size);

        packet.push(0x80); // V=2, P=0, X=0, CC=0
        packet.push(OPUS_PAYLOAD_TYPE);
        packet.extend_from_slice(&self.audio_sequence.to_be_bytes());
        self.audio_sequence = self.audio_sequence.wrapping_add(1);
        // 960 samples per 20ms at 48kHz
        packet.extend_from_slice(&self.audio_timestamp.to_be_bytes());
        self.audio_timestamp = self.audio_timestamp.wrapping_add(960);
        packet.extend_from_slice(&1u32.to_be_bytes());

        if enabled {
            packet.extend(std::iter::repeat(0xAA).take(payload_size.max(1)));
        } else {
            packet.extend_from_slice(&OPUS_SILENCE);
        }
        packet
    }

    fn frame_size(&self, is_keyframe: bool, enabled: bool) -> usize {
        if !enabled {
            return if is_keyframe { BLACK_FRAME_SIZE * 4 } else { BLACK_FRAME_SIZE };
        }
        let bytes_per_sec = (self.config.video_bitrate_kbps as usize) * 1000 / 8;
        let keyframe_interval = (self.config.video_fps.max(1) as usize) * 5;
        let inter_frames = keyframe_interval - 1;
        let inter_size = (bytes_per_sec * 5) / (inter_frames + 5);
        if is_keyframe { inter_size * 5 } else { inter_size }
    }

    /// One VP8 frame split into MTU-sized packets, marker on the last.
    fn video_frame(&mut self, enabled: bool) -> Vec<Vec<u8>> {
        let keyframe_interval = self.config.video_fps.max(1) as u64 * 5;
        let is_keyframe = self.frame_count % keyframe_interval == 0;
        let frame_size = self.frame_size(is_keyframe, enabled).max(10);
        let pic_id = (self.frame_count & 0x7F) as u8;

        let frame_timestamp = self.video_timestamp;
        self.video_timestamp = self
            .video_timestamp
            .wrapping_add(90000 / self.config.video_fps.max(1) as u32);
        self.frame_count += 1;

        let num_packets = frame_size.div_ceil(FRAME_DATA_PER_PACKET).max(1);
        let mut packets = Vec::with_capacity(num_packets);
        let mut remaining = frame_size;

        for i in 0..num_packets {
            let is_first = i == 0;
            let is_last = i == num_packets - 1;
            let chunk_size = remaining.min(FRAME_DATA_PER_PACKET);
            remaining -= chunk_size;

            let mut packet = Vec::with_capacity(12 + VP8_DESCRIPTOR_SIZE + chunk_size);
            packet.push(0x80);
            packet.push(VP8_PAYLOAD_TYPE | if is_last { 0x80 } else { 0x00 });
            packet.extend_from_slice(&self.video_sequence.to_be_bytes());
            self.video_sequence = self.video_sequence.wrapping_add(1);
            packet.extend_from_slice(&frame_timestamp.to_be_bytes());
            packet.extend_from_slice(&2u32.to_be_bytes());

            // VP8 payload descriptor (RFC 7741): X, S on first, I with 7-bit picture id
            packet.push(if is_first { 0x90 } else { 0x80 });
            packet.push(0x80);
            packet.push(pic_id);

            if is_first && is_keyframe {
                packet.extend_from_slice(&[0x10, 0x00, 0x00, 0x9D, 0x01, 0x2A]);
                packet.extend_from_slice(&(self.config.video_width as u16).to_le_bytes());
                packet.extend_from_slice(&(self.config.video_height as u16).to_le_bytes());
                packet.extend(std::iter::repeat(0x00).take(chunk_size.saturating_sub(10)));
            } else if is_first {
                packet.extend_from_slice(&[0x11, 0x00, 0x00]);
                packet.extend(std::iter::repeat(0x00).take(chunk_size.saturating_sub(3)));
            } else {
                packet.extend(std::iter::repeat(0x00).take(chunk_size));
            }

            packets.push(packet);
        }

        packets
    }
}
