//! WhatsApp sidecar adapter: a [`crate::protocol::ProtocolClient`] backed by
//! an HTTP bridge process that owns the actual WhatsApp session.
//!
//! The sidecar exposes `/connect`, `/disconnect`, `/send` and a long-polling
//! `/events/poll` endpoint.

pub mod client;
pub mod events;

pub use client::{SidecarClient, SidecarCredentials, DEFAULT_BRIDGE_URL};
pub use events::SidecarEvent;

/// Errors from the sidecar adapter.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    /// HTTP request to the sidecar failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sidecar answered with an error.
    #[error("sidecar rejected request: {0}")]
    Rejected(String),

    /// An event from the sidecar could not be interpreted.
    #[error("malformed sidecar event: {0}")]
    MalformedEvent(String),
}

impl From<SidecarError> for crate::protocol::ProtocolError {
    fn from(err: SidecarError) -> Self {
        Self::Transport(err.to_string())
    }
}
