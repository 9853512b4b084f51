#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use hanghive_mesh::chat::ChatChannel;
use hanghive_mesh::config::ClientConfig;
use hanghive_mesh::identity::LocalIdentity;
use hanghive_mesh::media::{MediaKind, SyntheticDevices, SyntheticMediaConfig};
use hanghive_mesh::rtc::WebRtcPeerFactory;
use hanghive_mesh::signaling::WsConnector;
use hanghive_mesh::CallCoordinator;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hanghive_mesh=debug,webrtc=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("HangHive mesh - Starting headless client");

    let config = ClientConfig::from_env().context("Invalid client configuration")?;
    let identity = LocalIdentity::from_env()
        .context("HANGHIVE_USER_ID and HANGHIVE_USERNAME must be set")?;
    let room_key = std::env::var("HANGHIVE_ROOM").unwrap_or_else(|_| "general".to_string());
    let kind = match std::env::var("HANGHIVE_CALL") {
        Ok(raw) => MediaKind::parse(&raw).with_context(|| format!("Invalid HANGHIVE_CALL: {raw}"))?,
        Err(_) => MediaKind::Video,
    };

    info!(
        "Signaling at {}, STUN {}, joining {} as {} ({})",
        config.ws_base_url,
        config.stun_url,
        room_key,
        identity.participant_id(),
        identity.display_name
    );

    let connector = Arc::new(WsConnector::new(config.channel_capacity));
    let media_config = SyntheticMediaConfig::from_env();
    let devices = Arc::new(SyntheticDevices::new(media_config).with_label(identity.participant_id()));
    let peers = Arc::new(WebRtcPeerFactory::new(config.stun_url.clone())?);

    let mut coordinator = CallCoordinator::new(config.clone(), identity.clone(), connector.clone(), devices, peers);

    // Chat is only used for call notices here; run without it if it's down
    match ChatChannel::open(&*connector, &config, &room_key, &identity.chat_client_id()).await {
        Ok(chat) => {
            coordinator.set_chat(Some(chat));
        }
        Err(e) => warn!("Chat channel unavailable, continuing without notices: {}", e),
    }

    let session = match coordinator.start_session(&room_key, kind).await {
        Ok(session) => session,
        Err(e) => {
            if e.is_fatal_for_start() {
                error!("Could not join {} call in {}: {}", kind, room_key, e);
            }
            if let Some(chat) = coordinator.set_chat(None) {
                chat.close().await;
            }
            return Err(e.into());
        }
    };
    info!("Joined {} call {} in {}", session.kind, session.session_id, session.room_key);

    let mut snapshots = coordinator.subscribe();
    let mut last_summary = String::new();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if !snapshot.is_active() {
                    warn!("Session ended by the server");
                    break;
                }
                let summary = format!(
                    "roster={} peers={} connected={} remote_media={}",
                    snapshot.roster.len(),
                    snapshot.peers.len(),
                    snapshot.connected_peers(),
                    snapshot.remote_media.len()
                );
                if summary != last_summary {
                    info!("{}", summary);
                    for peer in &snapshot.peers {
                        info!("  {} {} {}", peer.participant_id, peer.role, peer.state);
                    }
                    last_summary = summary;
                }
            }
            _ = &mut shutdown => {
                info!("Received Ctrl+C, leaving call...");
                break;
            }
        }
    }

    coordinator.end_session().await;
    if let Some(chat) = coordinator.set_chat(None) {
        chat.close().await;
    }

    println!("{}", coordinator.metrics().render_prometheus());
    info!("Client shutdown complete");
    Ok(())
}
