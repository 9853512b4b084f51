#![forbid(unsafe_code)]

// Error type for call operations

use thiserror::Error;

/// Custom error type for call and mesh operations
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),

    #[error("Signaling unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("Negotiation race: {kind} from {participant_id} has no matching peer")]
    NegotiationRace {
        participant_id: String,
        kind: &'static str,
    },

    #[error("Peer lost: {participant_id} reported {state}")]
    PeerLost {
        participant_id: String,
        state: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Channel full: {0}")]
    ChannelFull(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for call operations
pub type CallResult<T> = Result<T, CallError>;

impl CallError {
    /// Errors that stop a call from starting. Everything else is absorbed
    /// by the mesh and healed by the next roster broadcast.
    pub fn is_fatal_for_start(&self) -> bool {
        matches!(
            self,
            CallError::MediaAccessDenied(_) | CallError::SignalingUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_fatality() {
        assert!(CallError::MediaAccessDenied("no camera".into()).is_fatal_for_start());
        assert!(CallError::SignalingUnavailable("refused".into()).is_fatal_for_start());
        assert!(!CallError::NegotiationRace {
            participant_id: "7".into(),
            kind: "answer",
        }
        .is_fatal_for_start());
        assert!(!CallError::Transport("ice".into()).is_fatal_for_start());
    }

    #[test]
    fn test_messages_name_the_peer() {
        let err = CallError::PeerLost {
            participant_id: "77".into(),
            state: "failed".into(),
        };
        assert_eq!(err.to_string(), "Peer lost: 77 reported failed");
    }
}
