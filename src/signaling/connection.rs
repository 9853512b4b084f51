#![forbid(unsafe_code)]

// WebSocket link implementation over tokio-tungstenite

use super::{Connector, Link};
use crate::error::{CallError, CallResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Give up on the opening handshake after this long.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens real WebSocket links.
#[derive(Debug, Clone)]
pub struct WsConnector {
    /// Bounded capacity of each link's outbound queue
    channel_capacity: usize,
}

impl WsConnector {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> CallResult<Link> {
        let endpoint = url.to_string();
        let (ws_stream, _) = match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(endpoint.as_str())).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", endpoint, e);
                return Err(CallError::SignalingUnavailable(format!("{endpoint}: {e}")));
            }
            Err(_) => {
                warn!("Timed out connecting to {}", endpoint);
                return Err(CallError::SignalingUnavailable(format!(
                    "{endpoint}: no handshake within {CONNECT_TIMEOUT:?}"
                )));
            }
        };
        info!("WebSocket connected: {}", endpoint);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Arc<String>>(self.channel_capacity);
        let (in_tx, in_rx) = mpsc::channel::<String>(self.channel_capacity);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let writer_endpoint = endpoint.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = out_rx.recv() => {
                        let Some(json) = next else { break };
                        if ws_sender.send(Message::Text((*json).clone().into())).await.is_err() {
                            debug!("Send failed on {}, stopping writer", writer_endpoint);
                            return;
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            let _ = ws_sender.close().await;
            debug!("Writer finished for {}", writer_endpoint);
        });

        let reader_endpoint = endpoint;
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Dropping non-UTF-8 binary frame from {}", reader_endpoint);
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => {
                        info!("Server closed {}", reader_endpoint);
                        break;
                    }
                    Ok(_) => continue, // ping/pong handled by tungstenite
                    Err(e) => {
                        warn!("Read error on {}: {}", reader_endpoint, e);
                        break;
                    }
                };
                if in_tx.send(text).await.is_err() {
                    break;
                }
            }
            debug!("Reader finished for {}", reader_endpoint);
        });

        Ok(Link::new(out_tx, in_rx).with_tasks(shutdown_tx, writer, reader))
    }
}
