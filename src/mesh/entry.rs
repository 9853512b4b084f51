#![forbid(unsafe_code)]

// Peer entry - one connection per remote participant

use crate::metrics::PeerGuard;
use crate::rtc::{PeerState, PeerTransport};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Which side of the pair sends the offer. Fixed when the entry is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Initiator,
    Responder,
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationRole::Initiator => f.write_str("initiator"),
            NegotiationRole::Responder => f.write_str("responder"),
        }
    }
}

pub struct PeerEntry {
    pub participant_id: String,
    pub connection_id: u64,
    pub role: NegotiationRole,
    pub state: PeerState,
    pub transport: Arc<dyn PeerTransport>,
    pub created_at: Instant,
    /// Keeps the active-peer gauge in step with the entry map
    _guard: PeerGuard,
}

impl PeerEntry {
    pub fn new(
        participant_id: impl Into<String>,
        connection_id: u64,
        role: NegotiationRole,
        transport: Arc<dyn PeerTransport>,
        guard: PeerGuard,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            connection_id,
            role,
            state: PeerState::New,
            transport,
            created_at: Instant::now(),
            _guard: guard,
        }
    }
}
