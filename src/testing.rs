#![forbid(unsafe_code)]

// In-memory doubles for the adapter traits, shared by unit tests

use crate::error::{CallError, CallResult};
use crate::media::{LocalCapture, LocalTrack, MediaDevices, MediaKind};
use crate::rtc::{PeerEvents, PeerFactory, PeerTransport};
use crate::signaling::{Connector, IceCandidate, Link, SessionDescription, SignalMessage};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Shared call log; entries look like `"offer 77"` or `"close 10"`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub struct MockPeerFactory {
    log: CallLog,
    events: Mutex<HashMap<String, PeerEvents>>,
    fail_create: AtomicBool,
}

impl MockPeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log().iter().filter(|l| l.starts_with(prefix)).count()
    }

    /// Callback sender of the latest connection created for `participant_id`.
    pub fn events_for(&self, participant_id: &str) -> PeerEvents {
        self.events.lock().unwrap()[participant_id].clone()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create(&self, local_tracks: &[LocalTrack], events: PeerEvents) -> CallResult<Arc<dyn PeerTransport>> {
        let id = events.participant_id().to_string();
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CallError::Transport(format!("refusing to create peer for {id}")));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("create {} tracks={}", id, local_tracks.len()));
        self.events.lock().unwrap().insert(id.clone(), events);
        Ok(Arc::new(MockTransport {
            id,
            log: self.log.clone(),
        }))
    }
}

pub struct MockTransport {
    id: String,
    log: CallLog,
}

impl MockTransport {
    fn record(&self, what: &str) {
        self.log.lock().unwrap().push(format!("{} {}", what, self.id));
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self) -> CallResult<SessionDescription> {
        self.record("offer");
        Ok(SessionDescription::offer(format!("v=0 offer for {}", self.id)))
    }

    async fn create_answer(&self) -> CallResult<SessionDescription> {
        self.record("answer");
        Ok(SessionDescription::answer(format!("v=0 answer for {}", self.id)))
    }

    async fn set_local_description(&self, _desc: &SessionDescription) -> CallResult<()> {
        self.record("set_local");
        Ok(())
    }

    async fn set_remote_description(&self, _desc: &SessionDescription) -> CallResult<()> {
        self.record("set_remote");
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: &IceCandidate) -> CallResult<()> {
        self.record("candidate");
        Ok(())
    }

    async fn close(&self) -> CallResult<()> {
        self.record("close");
        Ok(())
    }
}

/// Capture devices that hand out silent tracks and remember them.
#[derive(Default)]
pub struct MockDevices {
    deny: AtomicBool,
    acquired: Mutex<Vec<LocalTrack>>,
}

impl MockDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Every track ever handed out, in order.
    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.acquired.lock().unwrap().clone()
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks().iter().filter(|t| !t.is_stopped()).count()
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn acquire(&self, kind: MediaKind) -> CallResult<LocalCapture> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::MediaAccessDenied("permission dismissed".into()));
        }
        let capture = LocalCapture::new(kind, "local");
        self.acquired.lock().unwrap().extend(capture.tracks().iter().cloned());
        Ok(capture)
    }
}

/// Server side of an in-memory link.
pub struct RemoteEnd {
    pub url: Url,
    to_client: mpsc::Sender<String>,
    from_client: mpsc::Receiver<Arc<String>>,
}

impl RemoteEnd {
    pub async fn push(&self, msg: &SignalMessage) {
        self.push_text(serde_json::to_string(msg).unwrap()).await;
    }

    pub async fn push_text(&self, text: impl Into<String>) {
        self.to_client.send(text.into()).await.unwrap();
    }

    /// Next frame the client sent, waiting up to a second.
    pub async fn next_text(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(1), self.from_client.recv())
            .await
            .ok()
            .flatten()
            .map(|text| (*text).clone())
    }

    pub async fn next_message(&mut self) -> Option<SignalMessage> {
        let text = self.next_text().await?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Frames already queued, without waiting.
    pub fn drain_texts(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            out.push((*text).clone());
        }
        out
    }

    /// True once the client dropped its side of the link.
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }

    /// Simulate the server dropping the connection.
    pub fn hang_up(self) {}
}

/// Connector producing in-memory links. Each connect queues a `RemoteEnd`.
#[derive(Default)]
pub struct MemoryConnector {
    fail: AtomicBool,
    remotes: Mutex<VecDeque<RemoteEnd>>,
    urls: Mutex<Vec<Url>>,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Oldest link not yet taken by the test.
    pub fn take_remote(&self) -> RemoteEnd {
        self.remotes.lock().unwrap().pop_front().expect("no link was opened")
    }

    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> CallResult<Link> {
        self.urls.lock().unwrap().push(url.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::SignalingUnavailable(format!("{url}: connection refused")));
        }
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        self.remotes.lock().unwrap().push_back(RemoteEnd {
            url: url.clone(),
            to_client: in_tx,
            from_client: out_rx,
        });
        Ok(Link::new(out_tx, in_rx))
    }
}
