#![forbid(unsafe_code)]

// Chat channel - the room's primary text channel, also used for call notices

use crate::config::ClientConfig;
use crate::error::CallResult;
use crate::media::MediaKind;
use crate::signaling::{Connector, Link, LinkSender};
use std::fmt;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notices posted to the room chat when a call starts or ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallNotice {
    Started(MediaKind),
    Ended(MediaKind),
}

impl fmt::Display for CallNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (verb, kind) = match self {
            CallNotice::Started(kind) => ("STARTED", kind),
            CallNotice::Ended(kind) => ("ENDED", kind),
        };
        let kind = match kind {
            MediaKind::Voice => "VOICE",
            MediaKind::Video => "VIDEO",
        };
        write!(f, "{verb}_{kind}_STREAM")
    }
}

/// Cloneable handle that posts call notices to one room's chat.
#[derive(Clone, Debug)]
pub struct NoticeSender {
    room_key: String,
    sender: LinkSender,
}

impl NoticeSender {
    /// Best-effort; failures are logged only.
    pub fn notify(&self, notice: CallNotice) {
        if let Err(e) = self.sender.send_text(notice.to_string()) {
            warn!("Could not post {} to {}: {}", notice, self.room_key, e);
        }
    }
}

/// Open link to `/ws/{room}/{client_id}`.
pub struct ChatChannel {
    room_key: String,
    sender: LinkSender,
    inbound: broadcast::Sender<serde_json::Value>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

impl ChatChannel {
    pub async fn open(
        connector: &dyn Connector,
        config: &ClientConfig,
        room_key: &str,
        client_id: &str,
    ) -> CallResult<Self> {
        let url = config.chat_url(room_key, client_id)?;
        let link = connector.connect(&url).await?;
        info!("Chat channel open for {} as {}", room_key, client_id);

        let sender = link.sender();
        let (inbound, _) = broadcast::channel(config.channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(link, inbound.clone(), shutdown_rx, room_key.to_string()));

        Ok(Self {
            room_key: room_key.to_string(),
            sender,
            inbound,
            shutdown: Some(shutdown_tx),
            reader: Some(reader),
        })
    }

    pub fn room_key(&self) -> &str {
        &self.room_key
    }

    /// Send trimmed text as one frame. Blank text is not sent.
    pub fn send_text(&self, text: &str) -> CallResult<()> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Not sending blank chat message");
            return Ok(());
        }
        self.sender.send_text(text)
    }

    pub fn notices(&self) -> NoticeSender {
        NoticeSender {
            room_key: self.room_key.clone(),
            sender: self.sender.clone(),
        }
    }

    pub fn notify(&self, notice: CallNotice) {
        self.notices().notify(notice);
    }

    /// Inbound chat payloads, parsed as JSON.
    pub fn subscribe(&self) -> broadcast::Receiver<serde_json::Value> {
        self.inbound.subscribe()
    }

    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(reader) = self.reader.take() {
            if tokio::time::timeout(Duration::from_secs(2), reader).await.is_err() {
                debug!("Chat reader for {} did not stop in time", self.room_key);
            }
        }
    }
}

impl Drop for ChatChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    mut link: Link,
    inbound: broadcast::Sender<serde_json::Value>,
    mut shutdown: oneshot::Receiver<()>,
    room_key: String,
) {
    loop {
        tokio::select! {
            frame = link.recv() => {
                let Some(text) = frame else {
                    info!("Chat channel for {} closed by server", room_key);
                    break;
                };
                match serde_json::from_str::<serde_json::Value>(&text) {
                    // No subscribers is fine
                    Ok(payload) => { let _ = inbound.send(payload); }
                    Err(e) => warn!("Skipping non-JSON chat frame in {}: {}", room_key, e),
                }
            }
            _ = &mut shutdown => break,
        }
    }
    link.close().await;
}
