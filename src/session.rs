#![forbid(unsafe_code)]

// Session task - owns one Mesh and feeds it signaling, peer events and commands

use crate::chat::{CallNotice, NoticeSender};
use crate::mesh::{Mesh, SessionInfo};
use crate::metrics::MeshMetrics;
use crate::rtc::PeerEvent;
use crate::signaling::{Link, SignalMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands accepted by a running session
#[derive(Debug)]
pub enum SessionCommand {
    ToggleAudio(oneshot::Sender<Option<bool>>),
    ToggleVideo(oneshot::Sender<Option<bool>>),
    End(oneshot::Sender<()>),
}

/// Handle to a running session. Dropping it ends the session.
#[derive(Debug)]
pub struct SessionHandle {
    info: SessionInfo,
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// True once the task exited on its own (signaling closed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn toggle_audio(&self) -> Option<bool> {
        self.request(SessionCommand::ToggleAudio).await
    }

    pub async fn toggle_video(&self) -> Option<bool> {
        self.request(SessionCommand::ToggleVideo).await
    }

    async fn request(&self, command: fn(oneshot::Sender<Option<bool>>) -> SessionCommand) -> Option<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(command(tx)).await.ok()?;
        rx.await.ok().flatten()
    }

    /// End the session and wait until everything is released.
    pub async fn end(self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::End(tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = self.task.await {
            warn!("Session {} task failed: {}", self.info.session_id, e);
        }
    }
}

/// Spawn the task driving `mesh` until ended or the signaling link drops.
///
/// The ended notice goes to `notices` on every exit, including a server hang-up.
pub fn spawn(
    mesh: Mesh,
    link: Link,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    metrics: MeshMetrics,
    notices: Option<NoticeSender>,
) -> SessionHandle {
    let info = mesh.info().clone();
    let (commands_tx, commands_rx) = mpsc::channel(16);
    let task = tokio::spawn(run(mesh, link, events, commands_rx, metrics, notices));
    SessionHandle {
        info,
        commands: commands_tx,
        task,
    }
}

async fn run(
    mut mesh: Mesh,
    mut link: Link,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    mut commands: mpsc::Receiver<SessionCommand>,
    metrics: MeshMetrics,
    notices: Option<NoticeSender>,
) {
    let session_id = mesh.info().session_id;
    let kind = mesh.info().kind;
    info!(
        "Session {} started: {} call in {} as {}",
        session_id,
        mesh.info().kind,
        mesh.info().room_key,
        mesh.info().local_participant_id
    );

    let ack = loop {
        tokio::select! {
            frame = link.recv() => {
                let Some(text) = frame else {
                    warn!("Signaling closed for session {}, ending call", session_id);
                    break None;
                };
                match serde_json::from_str::<SignalMessage>(&text) {
                    Ok(msg) => {
                        metrics.inc_signals_received();
                        debug!("Session {} received {}", session_id, msg.label());
                        mesh.on_signal(msg).await;
                    }
                    Err(e) => {
                        warn!("Ignoring malformed signaling frame: {}", e);
                        metrics.inc_errors();
                    }
                }
            }
            Some(event) = events.recv() => {
                mesh.on_peer_event(event).await;
            }
            command = commands.recv() => match command {
                Some(SessionCommand::ToggleAudio(reply)) => {
                    let _ = reply.send(mesh.toggle_audio());
                }
                Some(SessionCommand::ToggleVideo(reply)) => {
                    let _ = reply.send(mesh.toggle_video());
                }
                Some(SessionCommand::End(reply)) => break Some(reply),
                None => {
                    debug!("Session {} handle dropped", session_id);
                    break None;
                }
            },
        }
    };

    mesh.teardown().await;
    link.close().await;
    metrics.inc_sessions_ended();
    if let Some(notices) = &notices {
        notices.notify(CallNotice::Ended(kind));
    }
    info!("Session {} ended", session_id);

    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}
