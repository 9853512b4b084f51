#![forbid(unsafe_code)]

// Configuration for synthetic capture and the codecs every peer connection offers

use std::time::Duration;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

pub const OPUS_PAYLOAD_TYPE: u8 = 111;
pub const VP8_PAYLOAD_TYPE: u8 = 96;

/// Opus, 48 kHz stereo, in-band FEC
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// VP8 at the standard 90 kHz video clock
pub fn vp8_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/VP8".to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Configuration for the synthetic capture device
#[derive(Debug, Clone)]
pub struct SyntheticMediaConfig {
    /// Whether a microphone is present
    pub microphone: bool,
    /// Whether a camera is present
    pub camera: bool,
    pub audio_bitrate_kbps: u32,
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: u8,
    pub video_bitrate_kbps: u32,
}

impl Default for SyntheticMediaConfig {
    fn default() -> Self {
        Self {
            microphone: true,
            camera: true,
            audio_bitrate_kbps: 64,
            video_width: 640,
            video_height: 480,
            video_fps: 30,
            video_bitrate_kbps: 1000,
        }
    }
}

impl SyntheticMediaConfig {
    /// Host with a microphone but no camera
    pub fn microphone_only() -> Self {
        Self {
            camera: false,
            ..Default::default()
        }
    }

    /// `480p` (default), `720p` or `1080p`; fps scales the bitrate.
    pub fn from_preset(preset: &str, fps: u8) -> Self {
        let fps_multiplier = match fps {
            15 => 0.6,
            60 => 1.5,
            _ => 1.0,
        };
        let (width, height, base_bitrate_kbps) = match preset {
            "720p" => (1280, 720, 2500u32),
            "1080p" => (1920, 1080, 4500u32),
            _ => (640, 480, 1000u32),
        };
        Self {
            video_width: width,
            video_height: height,
            video_fps: fps.max(1),
            video_bitrate_kbps: (base_bitrate_kbps as f64 * fps_multiplier) as u32,
            ..Default::default()
        }
    }

    /// Load from `HANGHIVE_VIDEO_PRESET`, `HANGHIVE_VIDEO_FPS`,
    /// `HANGHIVE_NO_CAMERA` and `HANGHIVE_NO_MICROPHONE`.
    pub fn from_env() -> Self {
        let preset = std::env::var("HANGHIVE_VIDEO_PRESET").unwrap_or_default();
        let fps = std::env::var("HANGHIVE_VIDEO_FPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let mut config = Self::from_preset(&preset, fps);
        config.camera = std::env::var("HANGHIVE_NO_CAMERA").is_err();
        config.microphone = std::env::var("HANGHIVE_NO_MICROPHONE").is_err();
        config
    }

    /// 20ms Opus packets
    pub fn audio_packet_interval(&self) -> Duration {
        Duration::from_millis(20)
    }

    pub fn video_frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.video_fps.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_scale_bitrate() {
        let hd = SyntheticMediaConfig::from_preset("720p", 60);
        assert_eq!((hd.video_width, hd.video_height), (1280, 720));
        assert_eq!(hd.video_bitrate_kbps, 3750);

        let fallback = SyntheticMediaConfig::from_preset("8k", 30);
        assert_eq!(fallback.video_width, 640);
        assert_eq!(fallback.video_bitrate_kbps, 1000);
    }

    #[test]
    fn test_frame_interval_never_divides_by_zero() {
        let config = SyntheticMediaConfig {
            video_fps: 0,
            ..Default::default()
        };
        assert_eq!(config.video_frame_interval(), Duration::from_secs(1));
    }
}
