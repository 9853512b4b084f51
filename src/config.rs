#![forbid(unsafe_code)]

// Client configuration - backend endpoints, ICE server and channel sizing

use crate::error::{CallError, CallResult};
use crate::media::MediaKind;
use url::Url;

/// Backend used when running against a local development server.
pub const DEV_WS_BASE_URL: &str = "ws://localhost:8000";
/// Hosted backend.
pub const PROD_WS_BASE_URL: &str = "wss://hanghive-backend-rxyh.onrender.com";
/// The single public STUN server handed to every peer connection.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Default bounded capacity for outbound WebSocket queues.
/// Negotiation bursts are a handful of frames per peer; 64 covers a busy room.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Main client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket base URL, e.g. `ws://localhost:8000`
    pub ws_base_url: Url,
    /// STUN server URL (exactly one is configured)
    pub stun_url: String,
    /// Outbound queue capacity per WebSocket link
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_base_url: Url::parse(DEV_WS_BASE_URL).expect("static URL is valid"),
            stun_url: DEFAULT_STUN_URL.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// `HANGHIVE_WS_URL` wins over `HANGHIVE_ENV` (`dev` or `prod`).
    pub fn from_env() -> CallResult<Self> {
        let mut config = Self::default();

        let base = match std::env::var("HANGHIVE_WS_URL") {
            Ok(url) => url,
            Err(_) => match std::env::var("HANGHIVE_ENV").as_deref() {
                Ok("prod") | Ok("production") => PROD_WS_BASE_URL.to_string(),
                _ => DEV_WS_BASE_URL.to_string(),
            },
        };
        config.ws_base_url = parse_ws_url(&base)?;

        if let Ok(stun) = std::env::var("HANGHIVE_STUN_URL") {
            config.stun_url = stun;
        }

        config.channel_capacity = std::env::var("HANGHIVE_CHANNEL_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY);

        Ok(config)
    }

    pub fn with_ws_base_url(mut self, base: &str) -> CallResult<Self> {
        self.ws_base_url = parse_ws_url(base)?;
        Ok(self)
    }

    /// `{base}/ws/{kind}/{room}/{participant}?name={display_name}`
    pub fn signaling_url(
        &self,
        kind: MediaKind,
        room_key: &str,
        participant_id: &str,
        display_name: &str,
    ) -> CallResult<Url> {
        let mut url = self.endpoint(&[kind.as_str(), room_key, participant_id])?;
        url.query_pairs_mut().append_pair("name", display_name);
        Ok(url)
    }

    /// `{base}/ws/{room}/{client_id}`
    pub fn chat_url(&self, room_key: &str, client_id: &str) -> CallResult<Url> {
        self.endpoint(&[room_key, client_id])
    }

    fn endpoint(&self, segments: &[&str]) -> CallResult<Url> {
        let mut url = self.ws_base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                CallError::InvalidConfig(format!("{} cannot be a base URL", self.ws_base_url))
            })?;
            path.pop_if_empty().push("ws");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

fn parse_ws_url(raw: &str) -> CallResult<Url> {
    let url = Url::parse(raw).map_err(|e| CallError::InvalidConfig(format!("{raw}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(CallError::InvalidConfig(format!(
            "unsupported scheme '{other}' in {raw}, expected ws or wss"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signaling_url_layout() {
        let config = ClientConfig::default();
        let url = config
            .signaling_url(MediaKind::Video, "general", "neo_anderson", "Neo Anderson")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/ws/video/general/neo_anderson?name=Neo+Anderson"
        );
    }

    #[test]
    fn test_chat_url_layout() {
        let config = ClientConfig::default()
            .with_ws_base_url("wss://example.com/")
            .unwrap();
        let url = config.chat_url("art", "4660").unwrap();
        assert_eq!(url.as_str(), "wss://example.com/ws/art/4660");
    }

    #[test]
    fn test_path_segments_are_escaped() {
        let config = ClientConfig::default();
        let url = config.chat_url("a/b", "1").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/a%2Fb/1");
    }

    #[test]
    fn test_rejects_http_base() {
        assert!(matches!(
            ClientConfig::default().with_ws_base_url("http://localhost:8000"),
            Err(CallError::InvalidConfig(_))
        ));
    }
}
