#![forbid(unsafe_code)]

// Signaling module - WebSocket links to the backend and the call protocol

pub mod connection;
pub mod protocol;

pub use connection::WsConnector;
pub use protocol::{IceCandidate, Participant, SdpKind, SessionDescription, SignalMessage};

use crate::error::{CallError, CallResult};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

/// How long `close` waits for the writer to flush the close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens text links to backend endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    /// `CallError::SignalingUnavailable` if the endpoint cannot be reached.
    async fn connect(&self, url: &Url) -> CallResult<Link>;
}

/// Cloneable handle for queueing outbound text frames on a link.
#[derive(Clone, Debug)]
pub struct LinkSender {
    tx: mpsc::Sender<Arc<String>>,
}

impl LinkSender {
    pub fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        Self { tx }
    }

    /// Queue a raw text frame.
    ///
    /// # Errors
    /// `ChannelFull` when the writer is behind, `ChannelClosed` once the link is gone.
    pub fn send_text(&self, text: impl Into<String>) -> CallResult<()> {
        self.tx.try_send(Arc::new(text.into())).map_err(|e| match e {
            TrySendError::Full(_) => CallError::ChannelFull("outbound queue is full".into()),
            TrySendError::Closed(_) => CallError::ChannelClosed("link writer has stopped".into()),
        })
    }

    /// Serialize a message and queue it as one text frame.
    pub fn send_json<T: Serialize>(&self, msg: &T) -> CallResult<()> {
        let json = serde_json::to_string(msg)?;
        self.send_text(json)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A bidirectional text link: bounded outbound queue plus inbound frames.
///
/// The transport behind it (if any) runs in the attached tasks; `close`
/// stops them. In-memory links used by tests have no tasks.
pub struct Link {
    sender: LinkSender,
    inbound: mpsc::Receiver<String>,
    shutdown: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Link {
    pub fn new(outbound: mpsc::Sender<Arc<String>>, inbound: mpsc::Receiver<String>) -> Self {
        Self {
            sender: LinkSender::new(outbound),
            inbound,
            shutdown: None,
            writer: None,
            reader: None,
        }
    }

    /// Attach the transport tasks; `shutdown` tells the writer to send a close frame.
    pub fn with_tasks(
        mut self,
        shutdown: oneshot::Sender<()>,
        writer: JoinHandle<()>,
        reader: JoinHandle<()>,
    ) -> Self {
        self.shutdown = Some(shutdown);
        self.writer = Some(writer);
        self.reader = Some(reader);
        self
    }

    pub fn sender(&self) -> LinkSender {
        self.sender.clone()
    }

    /// Next inbound text frame; None once the remote side is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Close the link, giving the writer a moment to flush the close frame.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.inbound.close();
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
                debug!("Link writer did not finish within {:?}", CLOSE_FLUSH_TIMEOUT);
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_json_queues_one_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_in_tx, in_rx) = mpsc::channel(4);
        let link = Link::new(tx, in_rx);

        let msg = SignalMessage::Answer {
            target: "10".into(),
            sender: "77".into(),
            sdp: SessionDescription::answer("v=0"),
        };
        link.sender().send_json(&msg).unwrap();

        let frame = rx.recv().await.unwrap();
        let parsed: SignalMessage = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed, msg);
    }

    #[tokio::test]
    async fn test_full_queue_is_not_reported_as_closed() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = LinkSender::new(tx);
        sender.send_text("one").unwrap();
        assert!(matches!(sender.send_text("two"), Err(CallError::ChannelFull(_))));
        assert!(!sender.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_writer_is_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sender = LinkSender::new(tx);
        drop(rx);
        assert!(matches!(sender.send_text("one"), Err(CallError::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn test_recv_ends_when_remote_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let (in_tx, in_rx) = mpsc::channel(1);
        let mut link = Link::new(tx, in_rx);
        in_tx.send("hello".to_string()).await.unwrap();
        drop(in_tx);
        assert_eq!(link.recv().await.as_deref(), Some("hello"));
        assert_eq!(link.recv().await, None);
    }
}
