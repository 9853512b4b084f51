#![forbid(unsafe_code)]

// HangHive mesh library - WebRTC full-mesh voice and video calls over WebSocket signaling

pub mod chat;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod media;
pub mod mesh;
pub mod metrics;
pub mod rtc;
pub mod session;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::CallCoordinator;
pub use error::{CallError, CallResult};
